//! Credential files consumed by the proxy bootstrap
//!
//! The proxy reads its subject token and the CA certificate it uses to verify
//! the discovery server from fixed paths. The same [`CredentialPaths`] value is
//! handed to the bootstrap renderer, so the files and the bootstrap cannot
//! drift apart.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::CredentialError;

/// Default path of the CA certificate the proxy trusts for xDS
pub const DEFAULT_CA_CERT_PATH: &str = "/tmp/sts-ca-certificates.crt";

/// Default path of the subject token the proxy exchanges at the STS server
pub const DEFAULT_PROXY_TOKEN_PATH: &str = "/tmp/sts-envoy-token.jwt";

/// Where the credential files are written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPaths {
    /// Subject token file
    pub token: PathBuf,
    /// CA certificate file
    pub ca_cert: PathBuf,
}

impl Default for CredentialPaths {
    fn default() -> Self {
        Self {
            token: PathBuf::from(DEFAULT_PROXY_TOKEN_PATH),
            ca_cert: PathBuf::from(DEFAULT_CA_CERT_PATH),
        }
    }
}

impl CredentialPaths {
    /// Place both files inside a directory, keeping the default file names
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            token: dir.join("sts-envoy-token.jwt"),
            ca_cert: dir.join("sts-ca-certificates.crt"),
        }
    }
}

/// The bearer token and CA certificate handed to the proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialArtifacts {
    pub token: String,
    pub ca_cert: String,
}

impl CredentialArtifacts {
    pub fn new(token: impl Into<String>, ca_cert: impl Into<String>) -> Self {
        Self { token: token.into(), ca_cert: ca_cert.into() }
    }

    /// Write both artifacts verbatim to their paths
    pub fn materialize(&self, paths: &CredentialPaths) -> Result<(), CredentialError> {
        write_credential(&paths.token, &self.token)?;
        write_credential(&paths.ca_cert, &self.ca_cert)?;
        info!(
            token_path = %paths.token.display(),
            ca_cert_path = %paths.ca_cert.display(),
            "Credential files written"
        );
        Ok(())
    }
}

/// Write `content` to `path`, creating or truncating the file, and sync it to
/// stable storage before returning.
pub fn write_credential(path: impl AsRef<Path>, content: &str) -> Result<(), CredentialError> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(CredentialError::InvalidPath);
    }

    let io_error = |source| CredentialError::Io { path: path.to_path_buf(), source };
    let mut file = File::create(path).map_err(io_error)?;
    file.write_all(content.as_bytes()).map_err(io_error)?;
    // The proxy starts right after setup and must never observe a partial file.
    file.sync_all().map_err(io_error)?;
    Ok(())
}

/// Read a credential file back, mainly for assertions in tests
pub fn read_credential(path: impl AsRef<Path>) -> Result<String, CredentialError> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(CredentialError::InvalidPath);
    }
    fs::read_to_string(path).map_err(|source| CredentialError::Io { path: path.to_path_buf(), source })
}
