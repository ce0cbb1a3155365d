//! Guest file transfer over one-shot, pre-authenticated URLs.
//!
//! Every PUT/GET consumes a freshly minted ticket from the management plane;
//! tickets are never reused and there is no resume — a download whose body
//! does not match the reported size fails outright.

use crate::error::GomError;
use crate::vim::GuestApi;

pub struct FileTransfer<'a, A: GuestApi> {
    api: &'a A,
    http: &'a reqwest::Client,
    /// Management endpoint host, substituted for the wildcard placeholder in
    /// minted URLs.
    endpoint_host: &'a str,
}

impl<'a, A: GuestApi> FileTransfer<'a, A> {
    pub fn new(api: &'a A, http: &'a reqwest::Client, endpoint_host: &'a str) -> Self {
        Self {
            api,
            http,
            endpoint_host,
        }
    }

    /// Upload `contents` to a guest path, overwriting an existing file.
    pub async fn upload(&self, path: &str, contents: &[u8]) -> Result<(), GomError> {
        tracing::debug!(path, size = contents.len(), "writing guest file");

        let url = self
            .api
            .initiate_transfer_to_guest(path, contents.len() as u64, true)
            .await?;
        let url = rewrite_wildcard_host(&url, self.endpoint_host);

        self.http
            .put(&url)
            .body(contents.to_vec())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| GomError::Http {
                context: format!("upload of guest file {path}"),
                source,
            })?;

        Ok(())
    }

    /// Download a guest file, asserting the body matches the reported size.
    pub async fn download(&self, path: &str) -> Result<Vec<u8>, GomError> {
        tracing::debug!(path, "reading guest file");

        let ticket = self.api.initiate_transfer_from_guest(path).await?;
        let url = rewrite_wildcard_host(&ticket.url, self.endpoint_host);

        let body = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| GomError::Http {
                context: format!("download of guest file {path}"),
                source,
            })?
            .bytes()
            .await
            .map_err(|source| GomError::Http {
                context: format!("download of guest file {path}"),
                source,
            })?;

        if body.len() as u64 != ticket.size {
            return Err(GomError::SizeMismatch {
                path: path.to_string(),
                expected: ticket.size,
                actual: body.len() as u64,
            });
        }

        Ok(body.to_vec())
    }

    /// Whether a guest path exists. Any management-plane fault, including
    /// permission or transient errors, reads as "does not exist"; the listing
    /// call offers no way to tell these apart.
    pub async fn exists(&self, path: &str) -> bool {
        self.api.list_files(path).await.is_ok()
    }

    /// Read a guest file, treating a missing file as empty content.
    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>, GomError> {
        if !self.exists(path).await {
            return Ok(Vec::new());
        }
        self.download(path).await
    }

    /// Delete a guest file. A `FileNotFound` fault is swallowed and reported
    /// as `false` (idempotent deletion); every other fault propagates.
    pub async fn delete(&self, path: &str) -> Result<bool, GomError> {
        tracing::debug!(path, "deleting guest file");

        match self.api.delete_file(path).await {
            Ok(()) => Ok(true),
            Err(fault) if fault.is_kind("FileNotFound") => Ok(false),
            Err(fault) => Err(fault.into()),
        }
    }

    /// Delete a guest directory. Only a `NotADirectory` fault is re-raised;
    /// everything else, including a literal not-found, is swallowed as
    /// `false`. Note the asymmetry with `delete`.
    pub async fn delete_directory(&self, path: &str, recursive: bool) -> Result<bool, GomError> {
        tracing::debug!(path, recursive, "deleting guest directory");

        match self.api.delete_directory(path, recursive).await {
            Ok(()) => Ok(true),
            Err(fault) if fault.is_kind("NotADirectory") => Err(fault.into()),
            Err(_) => Ok(false),
        }
    }
}

/// Rewrite the wildcard host placeholder in a minted transfer URL to the
/// real management endpoint host, preserving scheme and port. vCenter mints
/// `https://*:443/guestFile?...` when its internal name does not match the
/// externally reachable one.
fn rewrite_wildcard_host(url: &str, host: &str) -> String {
    match url.split_once("://*:") {
        Some((scheme, rest)) => format!("{scheme}://{host}:{rest}"),
        None => url.to_string(),
    }
}
