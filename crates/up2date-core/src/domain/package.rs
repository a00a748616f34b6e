//! Package entity: one row per known local installer artifact.
//!
//! A [`Package`] is created either as an ephemeral `Downloading` placeholder
//! (the backend announced a download but the file does not exist yet) or when
//! a refresh pass discovers a new file in the download directory.  From then
//! on it is only ever *replaced* as a whole value; nobody edits a package that
//! other readers can see.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//!  download started          download finished + refresh
//!  ───────────────► Downloading ───────────────► Downloaded ◄──┐
//!                                                    │          │ detector says
//!                                    install_package │          │ "not installed"
//!                                                    ▼          │
//!                                               Installing      │
//!                                                    │          │
//!                        ┌───────────────┬───────────┴───┐      │
//!                        ▼               ▼               ▼      │
//!                    Installed     RestartNeeded       Failed ──┘
//! ```
//!
//! There is no "unavailable" status.  Looking up a package that does not
//! exist yields `None`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::result_codes::{INSTALL_SUCCESS, RESTART_NEEDED};

/// Installation status of a known package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackageStatus {
    /// The backend is still transferring the artifact; no file on disk yet.
    Downloading,
    /// The file is present in the download directory and not installed.
    Downloaded,
    /// An installer is currently running for this package.
    Installing,
    /// The product is installed on the host.
    Installed,
    /// The installer succeeded but the host must reboot to finish.
    RestartNeeded,
    /// The last installation attempt failed; see [`Package::error_code`].
    Failed,
}

impl PackageStatus {
    /// Maps a raw installer result code to the resulting package status.
    ///
    /// `0` is success, `3010` is the well-known "reboot required" code, and
    /// everything else is a failure.
    pub fn from_install_result(result: i32) -> Self {
        match result {
            INSTALL_SUCCESS => Self::Installed,
            RESTART_NEEDED => Self::RestartNeeded,
            _ => Self::Failed,
        }
    }

    /// Returns `true` for statuses a refresh pass must never overwrite.
    ///
    /// Both describe work that is still in progress somewhere else.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Downloading | Self::Installing)
    }
}

/// Installer file format, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageFormat {
    /// Platform installer database (`.msi`), installed by `msiexec`.
    NativeInstaller,
    /// Package-manager archive (`.nupkg`): a zip with a nuspec manifest and
    /// an install script.
    PackageManager,
    /// Any other file found in the download directory.
    Unknown,
}

impl PackageFormat {
    /// Native-installer file extension (without the dot).
    pub const NATIVE_INSTALLER_EXTENSION: &'static str = "msi";
    /// Package-manager archive file extension (without the dot).
    pub const PACKAGE_MANAGER_EXTENSION: &'static str = "nupkg";

    /// Classifies a path by its extension, ignoring case.
    pub fn from_path(path: &Path) -> Self {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return Self::Unknown;
        };
        if ext.eq_ignore_ascii_case(Self::NATIVE_INSTALLER_EXTENSION) {
            Self::NativeInstaller
        } else if ext.eq_ignore_ascii_case(Self::PACKAGE_MANAGER_EXTENSION) {
            Self::PackageManager
        } else {
            Self::Unknown
        }
    }
}

/// Record reported by an installation detector for an installed product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledProduct {
    /// Product code the record was found under.
    pub product_code: String,
    pub display_name: Option<String>,
    pub publisher: Option<String>,
    pub display_version: Option<String>,
    /// Packed numeric version (`major << 24 | minor << 16 | build`).
    pub version: Option<u32>,
    /// Install date as recorded by the detector (usually `yyyyMMdd`).
    pub install_date: Option<String>,
    /// Estimated size in KiB.
    pub estimated_size: Option<u32>,
    pub url_info_about: Option<String>,
}

/// One known local package.
///
/// `file_path` is the identity of a package; two packages whose paths differ
/// only in letter case are the same package (see [`Package::key`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub file_path: PathBuf,
    pub product_code: Option<String>,
    pub product_name: Option<String>,
    pub display_name: Option<String>,
    pub display_version: Option<String>,
    pub publisher: Option<String>,
    pub version: Option<u32>,
    pub install_date: Option<String>,
    pub estimated_size: Option<u32>,
    pub url_info_about: Option<String>,
    pub status: PackageStatus,
    /// Raw result code of the last installation attempt (`0` if none).
    pub error_code: i32,
}

impl Package {
    /// Creates a package for `file_path` with the given status and no metadata.
    pub fn new(file_path: impl Into<PathBuf>, status: PackageStatus) -> Self {
        Self {
            file_path: file_path.into(),
            product_code: None,
            product_name: None,
            display_name: None,
            display_version: None,
            publisher: None,
            version: None,
            install_date: None,
            estimated_size: None,
            url_info_about: None,
            status,
            error_code: 0,
        }
    }

    /// Creates the ephemeral placeholder shown while an artifact downloads.
    pub fn downloading(file_path: impl Into<PathBuf>) -> Self {
        Self::new(file_path, PackageStatus::Downloading)
    }

    /// Case-insensitive registry key for `path`.
    pub fn key_for(path: &Path) -> String {
        path.to_string_lossy().to_lowercase()
    }

    /// Case-insensitive registry key for this package.
    pub fn key(&self) -> String {
        Self::key_for(&self.file_path)
    }

    /// File name component of the package path (empty if there is none).
    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Returns `true` when `name` equals this package's file name, ignoring case.
    pub fn matches_file_name(&self, name: &str) -> bool {
        self.file_name().to_lowercase() == name.to_lowercase()
    }

    /// Installer format of this package.
    pub fn format(&self) -> PackageFormat {
        PackageFormat::from_path(&self.file_path)
    }

    /// Returns `true` for `Installed` and `RestartNeeded`.
    pub fn is_installed(&self) -> bool {
        matches!(
            self.status,
            PackageStatus::Installed | PackageStatus::RestartNeeded
        )
    }

    /// Returns a copy with display metadata taken from a detector record.
    pub fn with_installed_product(&self, product: &InstalledProduct) -> Self {
        Self {
            display_name: product.display_name.clone(),
            publisher: product.publisher.clone(),
            display_version: product.display_version.clone(),
            version: product.version,
            install_date: product.install_date.clone(),
            estimated_size: product.estimated_size,
            url_info_about: product.url_info_about.clone(),
            ..self.clone()
        }
    }

    /// Returns a copy with all detector-provided display metadata cleared.
    ///
    /// Product code and product name come from the file itself and are kept.
    pub fn without_display_metadata(&self) -> Self {
        Self {
            display_name: None,
            publisher: None,
            display_version: None,
            version: None,
            install_date: None,
            estimated_size: None,
            url_info_about: None,
            ..self.clone()
        }
    }

    /// Returns a copy in the `Installing` state with the error code reset.
    pub fn installing(&self) -> Self {
        Self {
            status: PackageStatus::Installing,
            error_code: 0,
            ..self.clone()
        }
    }

    /// Returns a copy reflecting the outcome of an installer run.
    pub fn with_install_result(&self, result: i32) -> Self {
        Self {
            status: PackageStatus::from_install_result(result),
            error_code: result,
            ..self.clone()
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
