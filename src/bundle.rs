//! Ephemeral guest-side script bundles.
//!
//! A staged command travels as three paths: the script temp file and its
//! `-out`/`-err` siblings. The siblings are never pre-created — they appear
//! only when the guest shell redirects into them.

use crate::error::GomError;
use crate::transfer::FileTransfer;
use crate::vim::GuestApi;

const TEMP_PREFIX: &str = "gom";

#[derive(Debug, Clone)]
pub struct ScriptBundle {
    pub script: String,
    pub stdout: String,
    pub stderr: String,
}

impl ScriptBundle {
    /// Derive the sibling paths from a staged script path.
    fn from_script(script: String) -> Self {
        let stdout = format!("{script}-out.txt");
        let stderr = format!("{script}-err.txt");
        Self {
            script,
            stdout,
            stderr,
        }
    }
}

/// Create a guest temp file with the profile's suffix and upload the command
/// text into it.
pub async fn stage<A: GuestApi>(
    api: &A,
    transfer: &FileTransfer<'_, A>,
    content: &str,
    suffix: &str,
) -> Result<ScriptBundle, GomError> {
    let script = api.create_temp_file(TEMP_PREFIX, suffix).await?;
    tracing::debug!(path = %script, "staged guest script");

    transfer.upload(&script, content.as_bytes()).await?;

    Ok(ScriptBundle::from_script(script))
}

/// Delete all three bundle paths. Deletion is idempotent — files the guest
/// never wrote (or already removed) are not an error; any other fault
/// propagates.
pub async fn cleanup<A: GuestApi>(
    transfer: &FileTransfer<'_, A>,
    bundle: &ScriptBundle,
) -> Result<(), GomError> {
    for path in [&bundle.script, &bundle.stdout, &bundle.stderr] {
        transfer.delete(path).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::testutil::{MockApi, MockState, spawn_server};
    use crate::vim::VimFault;

    #[test]
    fn siblings_derived_by_suffixing() {
        let bundle = ScriptBundle::from_script("/tmp/gom-1.sh".into());
        assert_eq!(bundle.stdout, "/tmp/gom-1.sh-out.txt");
        assert_eq!(bundle.stderr, "/tmp/gom-1.sh-err.txt");
    }

    #[tokio::test]
    async fn stage_creates_temp_file_and_uploads_content() {
        let server = spawn_server(HashMap::new()).await;
        let api = MockApi::new(MockState {
            put_url_base: format!("http://*:{}", server.addr.port()),
            ..MockState::default()
        });
        let http = reqwest::Client::new();
        let transfer = FileTransfer::new(&api, &http, "127.0.0.1");

        let bundle = stage(&api, &transfer, "echo hi", ".sh").await.unwrap();
        assert!(bundle.script.ends_with(".sh"));

        let state = api.state.lock().unwrap();
        assert_eq!(state.temp_files, vec![bundle.script.clone()]);

        let requests = server.requests.lock().unwrap();
        assert_eq!(requests[0].body, b"echo hi");
    }

    #[tokio::test]
    async fn cleanup_swallows_missing_files() {
        let bundle = ScriptBundle::from_script("/tmp/gom-1.sh".into());
        let api = MockApi::new(MockState {
            // The guest never wrote stderr, so deleting it faults not-found.
            delete_faults: HashMap::from([(
                bundle.stderr.clone(),
                VimFault::new("FileNotFound", "FileNotFound: no such file"),
            )]),
            ..MockState::default()
        });
        let http = reqwest::Client::new();
        let transfer = FileTransfer::new(&api, &http, "127.0.0.1");

        cleanup(&transfer, &bundle).await.unwrap();

        let state = api.state.lock().unwrap();
        assert_eq!(state.deleted, vec![bundle.script.clone(), bundle.stdout.clone()]);
    }

    #[tokio::test]
    async fn cleanup_propagates_other_faults() {
        let bundle = ScriptBundle::from_script("/tmp/gom-1.sh".into());
        let api = MockApi::new(MockState {
            delete_faults: HashMap::from([(
                bundle.script.clone(),
                VimFault::new("GuestPermissionDenied", "permission denied"),
            )]),
            ..MockState::default()
        });
        let http = reqwest::Client::new();
        let transfer = FileTransfer::new(&api, &http, "127.0.0.1");

        assert!(cleanup(&transfer, &bundle).await.is_err());
    }
}
