//! File-backed client certificate.
//!
//! The certificate is re-read at the start of every session, so replacing the
//! file on disk takes effect at the next reconnect without restarting the
//! service.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::application::connection::CertificateProvider;

/// Reads the client certificate (PEM text) from a file.
pub struct FileCertificateProvider {
    path: PathBuf,
}

impl FileCertificateProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` when the file exists and holds non-blank content.
    pub fn is_available(&self) -> bool {
        self.certificate().is_some()
    }
}

impl CertificateProvider for FileCertificateProvider {
    fn certificate(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => {
                debug!("certificate file {} is blank", self.path.display());
                None
            }
            Ok(text) => Some(text),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("certificate file {} not found", self.path.display());
                None
            }
            Err(e) => {
                warn!("cannot read certificate {}: {e}", self.path.display());
                None
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
