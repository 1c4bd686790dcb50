fn main() {
    std::process::exit(servebench::run().exit_code());
}
