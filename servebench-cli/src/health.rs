//! Health Gate
//!
//! Polls the served endpoint at a fixed cadence until it accepts a TCP
//! connection or the attempt budget runs out. Only reachability of the
//! listening socket is checked; an HTTP error response still counts as
//! ready. No backoff, no jitter.

use servebench_core::{HealthCheckResult, LOOPBACK_HOST, ProbeOutcome};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::interrupt::CancelToken;

/// Spacing between attempts
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);
/// Attempt budget (about thirty seconds worst case)
pub const HEALTH_CHECK_MAX_ATTEMPTS: u32 = 30;
/// Connect timeout of a single TCP probe
pub const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// A single reachability check
pub trait Probe {
    /// Perform one attempt
    fn probe(&mut self) -> ProbeOutcome;
}

impl<F> Probe for F
where
    F: FnMut() -> ProbeOutcome,
{
    fn probe(&mut self) -> ProbeOutcome {
        self()
    }
}

/// Probe that succeeds when a TCP connection can be established
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: SocketAddr,
    connect_timeout: Duration,
}

impl TcpProbe {
    /// Probe `addr`
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: PROBE_CONNECT_TIMEOUT,
        }
    }

    /// Probe the loopback endpoint at `port`
    pub fn loopback(port: u16) -> Self {
        let ip = LOOPBACK_HOST
            .parse::<IpAddr>()
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        Self::new(SocketAddr::new(ip, port))
    }

    /// Address being probed
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Probe for TcpProbe {
    fn probe(&mut self) -> ProbeOutcome {
        match TcpStream::connect_timeout(&self.addr, self.connect_timeout) {
            Ok(_) => ProbeOutcome::Ready,
            Err(e) => {
                debug!(addr = %self.addr, error = %e, "endpoint unreachable");
                ProbeOutcome::Unreachable
            }
        }
    }
}

/// Why polling stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// The endpoint accepted a connection
    Ready,
    /// Every attempt failed
    TimedOut,
    /// The serving process exited while being polled
    ServerExited,
    /// The run was cancelled
    Interrupted,
}

/// Outcome of a polling session
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Why polling stopped
    pub status: HealthStatus,
    /// Attempts actually performed
    pub attempts: u32,
    /// Wall-clock time spent polling
    pub elapsed: Duration,
    /// Per-attempt results in order
    pub checks: Vec<HealthCheckResult>,
}

/// Bounded, fixed-interval readiness poller
#[derive(Debug, Clone, Copy)]
pub struct HealthGate {
    interval: Duration,
    max_attempts: u32,
}

impl Default for HealthGate {
    fn default() -> Self {
        Self::new(HEALTH_CHECK_INTERVAL, HEALTH_CHECK_MAX_ATTEMPTS)
    }
}

impl HealthGate {
    /// Gate with a custom cadence; at least one attempt is always made
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Attempt budget
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Poll until ready, timed out, cancelled, or the server dies.
    ///
    /// `server_alive` is consulted before every attempt; polling stops on the
    /// first successful probe, so a probe that succeeds on attempt `k` is
    /// called exactly `k` times.
    pub fn wait(
        &self,
        probe: &mut dyn Probe,
        cancel: &CancelToken,
        mut server_alive: impl FnMut() -> bool,
    ) -> HealthReport {
        let start = Instant::now();
        let mut checks = Vec::new();

        let status = 'poll: {
            for attempt in 1..=self.max_attempts {
                if cancel.is_cancelled() {
                    break 'poll HealthStatus::Interrupted;
                }
                if !server_alive() {
                    break 'poll HealthStatus::ServerExited;
                }

                let outcome = probe.probe();
                checks.push(HealthCheckResult { attempt, outcome });
                debug!(attempt, max = self.max_attempts, ?outcome, "health check");

                if outcome == ProbeOutcome::Ready {
                    break 'poll HealthStatus::Ready;
                }
                if attempt < self.max_attempts && !cancel.sleep(self.interval) {
                    break 'poll HealthStatus::Interrupted;
                }
            }
            HealthStatus::TimedOut
        };

        let report = HealthReport {
            status,
            attempts: checks.len() as u32,
            elapsed: start.elapsed(),
            checks,
        };
        match report.status {
            HealthStatus::Ready => info!(attempts = report.attempts, "server is ready"),
            HealthStatus::TimedOut => warn!(attempts = report.attempts, "server never became reachable"),
            HealthStatus::ServerExited => warn!(attempts = report.attempts, "server exited before becoming ready"),
            HealthStatus::Interrupted => warn!(attempts = report.attempts, "health check interrupted"),
        }
        report
    }
}
