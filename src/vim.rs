//! Management-plane seam for the guest operations engine.
//!
//! `GuestApi` covers exactly the vim25 operations the engine consumes; the
//! SOAP session in `soap.rs` is the production implementation, and the test
//! mock in `testutil.rs` simulates a guest. Implementations carry the VM
//! reference and in-guest credentials, so callers never pass them per call.

use std::net::Ipv4Addr;

use thiserror::Error;

/// A fault reported by the management plane for a guest operation.
///
/// `kind` is the vim25 fault type from the SOAP fault detail (e.g.
/// `FileNotFound`, `NotADirectory`); `message` is the fault string. The
/// narrow recovery points in `transfer.rs` match on these patterns; every
/// other fault propagates unchanged.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct VimFault {
    pub kind: String,
    pub message: String,
}

impl VimFault {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Narrow pattern check against the fault payload: either the parsed
    /// fault type, or a `Kind:`-prefixed message (the form some SOAP stacks
    /// render into the fault string).
    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind || self.message.starts_with(&format!("{kind}:"))
    }
}

/// Tools-reported guest metadata used for OS family detection.
#[derive(Debug, Clone, Default)]
pub struct GuestInfo {
    /// `guest.guestFamily`, e.g. "linuxGuest" / "windowsGuest". Absent when
    /// VMware Tools are not initialized or missing.
    pub guest_family: Option<String>,
    /// `config.guestId`, e.g. "ubuntu64Guest" / "windows2019srv_64Guest".
    pub guest_id: Option<String>,
}

/// One entry from `ListProcessesInGuest`.
#[derive(Debug, Clone)]
pub struct GuestProcess {
    pub pid: i64,
    /// Absent while the process is still running.
    pub exit_code: Option<i32>,
}

/// A one-shot download ticket from `InitiateFileTransferFromGuest`.
#[derive(Debug, Clone)]
pub struct TransferTicket {
    /// Pre-authenticated URL, consumed by exactly one GET. The host portion
    /// may be the wildcard placeholder `*`.
    pub url: String,
    /// Byte size the management plane reports for the guest file.
    pub size: u64,
}

/// The guest-operations calls consumed by the engine, authenticated with
/// in-guest credentials on every call.
#[allow(async_fn_in_trait)]
pub trait GuestApi {
    async fn guest_info(&self) -> Result<GuestInfo, VimFault>;

    /// File-listing query for a single path. Only success vs. fault matters
    /// to the engine; the listing payload is discarded.
    async fn list_files(&self, path: &str) -> Result<(), VimFault>;

    /// Create a guest temp file and return its path.
    async fn create_temp_file(&self, prefix: &str, suffix: &str) -> Result<String, VimFault>;

    /// Request a one-shot PUT URL sized to `size`.
    async fn initiate_transfer_to_guest(
        &self,
        path: &str,
        size: u64,
        overwrite: bool,
    ) -> Result<String, VimFault>;

    /// Request a one-shot GET ticket with the reported file size.
    async fn initiate_transfer_from_guest(&self, path: &str) -> Result<TransferTicket, VimFault>;

    async fn delete_file(&self, path: &str) -> Result<(), VimFault>;

    async fn delete_directory(&self, path: &str, recursive: bool) -> Result<(), VimFault>;

    /// Start a guest program and return the guest pid. Poll immediately:
    /// guest pids may be reused once a process is reaped.
    async fn start_program(&self, program: &str, arguments: &str) -> Result<i64, VimFault>;

    /// Query process state for the given pids.
    async fn list_processes(&self, pids: &[i64]) -> Result<Vec<GuestProcess>, VimFault>;
}

// ── VM identifier classification ────────────────────────────────────
//
// The search index is queried differently depending on what the configured
// `guest.host` looks like: IPv4 address, instance UUID, inventory path, or
// (fallback) DNS name.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    Ip,
    Uuid,
    InventoryPath,
    DnsName,
}

impl SearchType {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchType::Ip => "IP",
            SearchType::Uuid => "UUID",
            SearchType::InventoryPath => "PATH",
            SearchType::DnsName => "DNS",
        }
    }
}

pub fn classify_identifier(needle: &str) -> SearchType {
    if needle.parse::<Ipv4Addr>().is_ok() {
        SearchType::Ip
    } else if is_uuid(needle) {
        SearchType::Uuid
    } else if needle.contains('/') {
        SearchType::InventoryPath
    } else {
        SearchType::DnsName
    }
}

fn is_uuid(s: &str) -> bool {
    let groups = [8, 4, 4, 4, 12];
    let mut parts = s.split('-');
    for len in groups {
        let Some(part) = parts.next() else {
            return false;
        };
        if part.len() != len || !part.chars().all(|c| c.is_ascii_hexdigit()) {
            return false;
        }
    }
    parts.next().is_none()
}
