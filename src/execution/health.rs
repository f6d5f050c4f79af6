//! Health waiting - bounded polling of external dependencies

use crate::core::{HealthCheck, ProbeKind};
use crate::execution::process::{run_process, ProcessSpec};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

/// Something that can say whether a dependency is ready
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> bool;
}

/// Result of waiting on a probe; a timeout is a value, not an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
}

impl WaitOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, WaitOutcome::Ready { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            WaitOutcome::Ready { attempts } | WaitOutcome::TimedOut { attempts } => *attempts,
        }
    }
}

/// Polls a probe every `interval`, at most `max_attempts` times
///
/// Each probe call is bounded by `interval` as well, so a wait never takes
/// longer than `interval * max_attempts`.
#[derive(Debug, Clone, Copy)]
pub struct HealthWaiter {
    interval: Duration,
    max_attempts: u32,
}

impl HealthWaiter {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    pub fn for_check(check: &HealthCheck) -> Self {
        Self::new(check.interval, check.max_attempts)
    }

    pub async fn wait_ready(&self, probe: &dyn HealthProbe) -> WaitOutcome {
        self.wait_ready_with(probe, |_, _| {}).await
    }

    /// Like `wait_ready`, reporting `(attempt, healthy)` after every probe call
    pub async fn wait_ready_with<F>(&self, probe: &dyn HealthProbe, mut on_attempt: F) -> WaitOutcome
    where
        F: FnMut(u32, bool) + Send,
    {
        for attempt in 1..=self.max_attempts {
            let attempt_started = Instant::now();
            let healthy = timeout(self.interval, probe.check()).await.unwrap_or(false);
            on_attempt(attempt, healthy);

            if healthy {
                info!("{} ready after {} attempt(s)", probe.name(), attempt);
                return WaitOutcome::Ready { attempts: attempt };
            }

            debug!("{} not ready (attempt {}/{})", probe.name(), attempt, self.max_attempts);
            if attempt < self.max_attempts {
                sleep_until(attempt_started + self.interval).await;
            }
        }

        warn!(
            "{} not ready after {} attempt(s)",
            probe.name(),
            self.max_attempts
        );
        WaitOutcome::TimedOut {
            attempts: self.max_attempts,
        }
    }
}

/// Ready when a shell command exits 0, e.g. `pg_isready -h localhost`
#[derive(Debug, Clone)]
pub struct CommandProbe {
    name: String,
    command: String,
    timeout: Duration,
}

impl CommandProbe {
    pub fn new(name: impl Into<String>, command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl HealthProbe for CommandProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> bool {
        let spec = ProcessSpec::new("sh", self.timeout).args(["-c", self.command.as_str()]);
        match run_process(&spec).await {
            Ok(output) => output.success(),
            Err(e) => {
                debug!("Probe {} failed to run: {}", self.name, e);
                false
            }
        }
    }
}

/// Ready when a TCP connection to `addr` succeeds
#[derive(Debug, Clone)]
pub struct TcpProbe {
    name: String,
    addr: String,
}

impl TcpProbe {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
        }
    }
}

#[async_trait]
impl HealthProbe for TcpProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> bool {
        TcpStream::connect(self.addr.as_str()).await.is_ok()
    }
}

/// Creates probes for configured health checks
pub trait ProbeFactory: Send + Sync {
    fn probe_for(&self, check: &HealthCheck) -> Box<dyn HealthProbe>;
}

/// Builds real command and TCP probes
#[derive(Debug, Clone, Default)]
pub struct SystemProbes;

impl ProbeFactory for SystemProbes {
    fn probe_for(&self, check: &HealthCheck) -> Box<dyn HealthProbe> {
        match &check.probe {
            ProbeKind::Command(command) => {
                Box::new(CommandProbe::new(&check.name, command, check.interval))
            }
            ProbeKind::Tcp(addr) => Box::new(TcpProbe::new(&check.name, addr)),
        }
    }
}
