//! Package file inspection.
//!
//! [`ArchiveInspector`] reads identity out of installer files:
//!
//! | format | product code | product name |
//! |--------|--------------|--------------|
//! | `.msi` | `ProductCode` row of the `Property` table | `ProductName` row |
//! | `.nupkg` | nuspec `<id>` | nuspec `<title>` |
//!
//! and, for `.nupkg` archives, the embedded install marker and manifest.

pub mod mock;

use std::path::Path;

use tracing::debug;
use up2date_core::PackageFormat;

use crate::application::setup_manager::{
    EmbeddedInstallState, InspectionError, PackageInspector, PackageMetadata,
};
use crate::infrastructure::archive::{self, ArchiveError};

#[derive(Debug, Default)]
pub struct ArchiveInspector;

impl ArchiveInspector {
    pub fn new() -> Self {
        Self
    }
}

impl PackageInspector for ArchiveInspector {
    fn metadata(&self, path: &Path) -> Result<PackageMetadata, InspectionError> {
        match PackageFormat::from_path(path) {
            PackageFormat::NativeInstaller => msi_metadata(path),
            PackageFormat::PackageManager => {
                let manifest = archive::read_manifest(path).map_err(|e| inspection_error(path, e))?;
                Ok(PackageMetadata {
                    product_code: Some(manifest.id),
                    product_name: Some(manifest.title).filter(|t| !t.is_empty()),
                })
            }
            PackageFormat::Unknown => Ok(PackageMetadata::default()),
        }
    }

    fn embedded_state(&self, path: &Path) -> Result<EmbeddedInstallState, InspectionError> {
        if PackageFormat::from_path(path) != PackageFormat::PackageManager {
            return Ok(EmbeddedInstallState::default());
        }

        let install_date = archive::read_install_date(path).map_err(|e| inspection_error(path, e))?;
        let manifest = match archive::read_manifest(path) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                debug!("no manifest in {}: {e}", path.display());
                None
            }
        };
        Ok(EmbeddedInstallState {
            install_date,
            manifest,
        })
    }
}

fn msi_metadata(path: &Path) -> Result<PackageMetadata, InspectionError> {
    let unreadable = |e: std::io::Error| InspectionError::Unreadable {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let mut package = ::msi::open(path).map_err(unreadable)?;
    let rows = package
        .select_rows(::msi::Select::table("Property"))
        .map_err(unreadable)?;

    let mut metadata = PackageMetadata::default();
    for row in rows {
        let value = row["Value"].as_str().map(str::to_string);
        match row["Property"].as_str() {
            Some("ProductCode") => metadata.product_code = value,
            Some("ProductName") => metadata.product_name = value,
            _ => {}
        }
    }
    Ok(metadata)
}

fn inspection_error(path: &Path, error: ArchiveError) -> InspectionError {
    match error {
        ArchiveError::MissingManifest => InspectionError::MissingManifest(path.to_path_buf()),
        ArchiveError::Manifest(source) => InspectionError::Manifest {
            path: path.to_path_buf(),
            source,
        },
        other => InspectionError::Unreadable {
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    }
}
