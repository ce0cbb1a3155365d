//! Remote command execution through the guest operations service.
//!
//! One `Executor` serves one connection; `run` takes `&mut self`, so a
//! session never has two commands in flight. The detected OS family is
//! cached for the session's lifetime.

use std::time::Duration;

use crate::bundle;
use crate::error::GomError;
use crate::process::{POLL_INTERVAL, ProcessMonitor};
use crate::shell::{OsFamily, ShellType, detect_family};
use crate::transfer::FileTransfer;
use crate::vim::GuestApi;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Decoded stdout text (BOM-repaired for the powershell profile).
    pub stdout: String,
    /// Raw stderr text.
    pub stderr: String,
    /// Absent when the exit code could not be retrieved.
    pub exit_code: Option<i32>,
}

pub struct Executor<A: GuestApi> {
    api: A,
    http: reqwest::Client,
    endpoint_host: String,
    cleanup: bool,
    poll_interval: Duration,
    os_family: Option<OsFamily>,
}

impl<A: GuestApi> Executor<A> {
    pub fn new(api: A, http: reqwest::Client, endpoint_host: String, cleanup: bool) -> Self {
        Self {
            api,
            http,
            endpoint_host,
            cleanup,
            poll_interval: POLL_INTERVAL,
            os_family: None,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Guest file transfer bound to this session.
    pub fn transfer(&self) -> FileTransfer<'_, A> {
        FileTransfer::new(&self.api, &self.http, &self.endpoint_host)
    }

    /// Detected OS family, computed once per session.
    pub async fn os_family(&mut self) -> Result<OsFamily, GomError> {
        if let Some(family) = self.os_family {
            return Ok(family);
        }

        let info = self.api.guest_info().await?;
        let family = detect_family(&info);
        tracing::debug!(?family, "detected guest OS family");
        self.os_family = Some(family);
        Ok(family)
    }

    /// Run a command in the guest and collect its output.
    pub async fn run(
        &mut self,
        command: &str,
        shell: ShellType,
        timeout: Duration,
    ) -> Result<CommandResult, GomError> {
        tracing::debug!(command, %shell, "running command remotely");

        // The family drives the hex exit-code log even when the shell is
        // explicit, so detect it up front.
        let family = self.os_family().await?;
        let shell = shell.resolve(family);
        let profile = shell.profile();

        let transfer = FileTransfer::new(&self.api, &self.http, &self.endpoint_host);
        let bundle = bundle::stage(&self.api, &transfer, command, profile.suffix).await?;
        let args = profile.compose_args(&bundle.script, &bundle.stdout, &bundle.stderr);

        let monitor = ProcessMonitor::new(&self.api);
        let outcome = async {
            let pid = monitor.launch(profile.program, &args).await?;
            monitor.wait_for_exit(pid, timeout, self.poll_interval).await?;
            monitor.exit_code(pid).await
        }
        .await;

        let exit_code = match outcome {
            Ok(exit_code) => exit_code,
            Err(timeout_err @ GomError::ProcessTimeout { .. }) => {
                // Timeout surfaces as-is; the guest process keeps running.
                if self.cleanup {
                    let _ = bundle::cleanup(&transfer, &bundle).await;
                }
                return Err(timeout_err);
            }
            Err(_) => {
                let stderr = transfer
                    .read_file(&bundle.stderr)
                    .await
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .unwrap_or_default();
                if self.cleanup {
                    let _ = bundle::cleanup(&transfer, &bundle).await;
                }
                return Err(GomError::CommandExecution {
                    command: command.to_string(),
                    exit_code: -1,
                    stderr,
                });
            }
        };

        let outputs = async {
            let stdout = decode_stdout(&transfer.read_file(&bundle.stdout).await?);
            let stderr =
                String::from_utf8_lossy(&transfer.read_file(&bundle.stderr).await?).into_owned();
            Ok::<_, GomError>((stdout, stderr))
        }
        .await;

        let (stdout, stderr) = match outputs {
            Ok(outputs) => outputs,
            Err(err) => {
                if self.cleanup {
                    let _ = bundle::cleanup(&transfer, &bundle).await;
                }
                return Err(err);
            }
        };

        if self.cleanup {
            bundle::cleanup(&transfer, &bundle).await?;
        }

        if family == OsFamily::Windows
            && let Some(code) = exit_code
            && code != 0
        {
            tracing::debug!(hex = %hex_exit_code(code), "received Windows exit code");
        }

        Ok(CommandResult {
            stdout,
            stderr,
            exit_code,
        })
    }
}

/// Repair the powershell profile's redirected output: `Out-File -Encoding
/// ASCII` still emits UTF-16LE with a BOM. When the marker is present, strip
/// it and squeeze the output to one byte per character by dropping the NUL
/// high bytes. Anything else passes through unmodified.
fn decode_stdout(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFF, 0xFE]) {
        bytes[2..]
            .iter()
            .filter(|&&b| b != 0)
            .map(|&b| b as char)
            .collect()
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Render an exit code as its unsigned 32-bit hex form for log display.
/// Negative codes come from signed 32-bit Windows semantics: `-1` →
/// `0xFFFFFFFF`.
pub fn hex_exit_code(code: i32) -> String {
    format!("0x{:X}", code as u32)
}
