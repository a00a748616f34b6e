//! Installer result codes shared by every executor.
//!
//! Native installer exit codes are passed through unchanged.  The
//! package-manager executor has no process exit code of its own, so each of
//! its failure stages gets a small positive code from [`NupkgInstallError`].

use serde::{Deserialize, Serialize};

/// Installer finished successfully.
pub const INSTALL_SUCCESS: i32 = 0;

/// Installer succeeded; a reboot is required to complete the installation.
pub const RESTART_NEEDED: i32 = 3010;

/// Installation was cancelled before the installer finished.
pub const INSTALL_CANCELLED: i32 = 1602;

/// Fatal error during installation (also used when the installer could not
/// be started at all).
pub const INSTALL_FAILURE: i32 = 1603;

/// Failure stages of a package-manager archive installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum NupkgInstallError {
    /// The sibling extraction directory could not be (re)created.
    FailedToCreateDirectory = 1,
    /// The archive could not be opened or extracted.
    FailedToExtractArchive = 2,
    /// The bundled install script is missing or could not be sanitized.
    FailedToPrepareScript = 3,
    /// The install script could not be run or exited non-zero.
    FailedToExecuteScript = 4,
    /// The "installed" marker could not be written back into the archive.
    FailedToWriteMarker = 5,
}

impl NupkgInstallError {
    /// The raw result code stored on the package.
    pub fn code(self) -> i32 {
        self as i32
    }
}
