//! Guest process launch and exit polling.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::GomError;
use crate::vim::GuestApi;

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct ProcessMonitor<'a, A: GuestApi> {
    api: &'a A,
}

impl<'a, A: GuestApi> ProcessMonitor<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Start a guest program with a single composed argument string and
    /// return the guest pid.
    pub async fn launch(&self, program: &str, arguments: &str) -> Result<i64, GomError> {
        tracing::debug!(program, arguments, "starting guest program");

        let pid = self.api.start_program(program, arguments).await?;
        tracing::debug!(pid, "guest program started");
        Ok(pid)
    }

    /// Poll guest process state at `interval` until the pid is no longer
    /// running or `timeout` elapses. The deadline is soft: it is checked once
    /// per iteration, so a slow query can overrun it by one query's latency.
    /// Timeout expiry does not terminate the guest process.
    pub async fn wait_for_exit(
        &self,
        pid: i64,
        timeout: Duration,
        interval: Duration,
    ) -> Result<(), GomError> {
        let start = Instant::now();

        loop {
            if !self.still_running(pid).await? {
                return Ok(());
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(GomError::ProcessTimeout {
                    pid,
                    elapsed_s: elapsed.as_secs_f64(),
                });
            }

            tokio::time::sleep(interval).await;
        }
    }

    /// Re-query process state and return the exit code, or `None` when the
    /// guest no longer lists the pid.
    pub async fn exit_code(&self, pid: i64) -> Result<Option<i32>, GomError> {
        let procs = self.api.list_processes(&[pid]).await?;
        Ok(procs.first().and_then(|p| p.exit_code))
    }

    /// A pid counts as exited when the listing has no entry for it, or the
    /// entry carries an exit code. An already-reaped process therefore reads
    /// as exited with no exit code, never as still running.
    async fn still_running(&self, pid: i64) -> Result<bool, GomError> {
        let procs = self.api.list_processes(&[pid]).await?;
        Ok(!procs.is_empty() && procs.iter().all(|p| p.exit_code.is_none()))
    }
}
