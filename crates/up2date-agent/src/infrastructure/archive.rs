//! Zip helpers for package-manager archives.
//!
//! Shared by the archive inspector (read side) and the package-manager
//! installer (extract and stamp side).

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use up2date_core::manifest::{is_manifest_entry, INSTALL_MARKER_ENTRY};
use up2date_core::{InstallMarker, ManifestError, NuspecManifest};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

/// Error type for archive access.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid archive: {0}")]
    Zip(#[from] ZipError),
    #[error("archive has no manifest entry")]
    MissingManifest,
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

fn open(path: &Path) -> Result<ZipArchive<File>, ArchiveError> {
    Ok(ZipArchive::new(File::open(path)?)?)
}

/// Extracts every entry of `archive` below `destination`.
pub fn extract(archive: &Path, destination: &Path) -> Result<(), ArchiveError> {
    open(archive)?.extract(destination)?;
    Ok(())
}

/// Reads and parses the archive's manifest entry.
pub fn read_manifest(path: &Path) -> Result<NuspecManifest, ArchiveError> {
    let mut archive = open(path)?;
    let name = archive
        .file_names()
        .find(|name| is_manifest_entry(name))
        .map(str::to_string)
        .ok_or(ArchiveError::MissingManifest)?;

    let mut xml = String::new();
    archive.by_name(&name)?.read_to_string(&mut xml)?;
    Ok(NuspecManifest::parse(&xml)?)
}

/// Returns the install date recorded in the marker entry, or `None` when the
/// archive has no marker.
///
/// A marker whose contents are not a valid timestamp still counts as a
/// marker; its trimmed text is returned as-is.
pub fn read_install_date(path: &Path) -> Result<Option<String>, ArchiveError> {
    let mut archive = open(path)?;
    let mut text = String::new();
    match archive.by_name(INSTALL_MARKER_ENTRY) {
        Ok(mut entry) => entry.read_to_string(&mut text)?,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let date = match InstallMarker::parse(&text) {
        Ok(marker) => marker.install_date(),
        Err(e) => {
            debug!("{}: {e}", path.display());
            text.trim().to_string()
        }
    };
    Ok(Some(date))
}

/// Rewrites `path` with an install marker entry holding `marker`.
///
/// All other entries are copied without recompression into a temporary
/// sibling file, which then replaces the original.  An existing marker is
/// replaced.
pub fn write_install_marker(path: &Path, marker: &InstallMarker) -> Result<(), ArchiveError> {
    let temp = temp_path(path);
    let result = write_marked_copy(path, &temp, marker)
        .and_then(|()| std::fs::rename(&temp, path).map_err(ArchiveError::from));
    if result.is_err() {
        std::fs::remove_file(&temp).ok();
    }
    result
}

fn write_marked_copy(source: &Path, target: &Path, marker: &InstallMarker) -> Result<(), ArchiveError> {
    let mut archive = open(source)?;
    let mut writer = ZipWriter::new(File::create(target)?);

    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        if entry.name() == INSTALL_MARKER_ENTRY {
            continue;
        }
        writer.raw_copy_file(entry)?;
    }

    writer.start_file(INSTALL_MARKER_ENTRY, SimpleFileOptions::default())?;
    writer.write_all(marker.to_entry_contents().as_bytes())?;
    writer.finish()?;
    Ok(())
}

/// Hidden sibling used while rewriting; the refresh pass skips hidden files.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use uuid::Uuid;

    /// Builds a package-manager archive with the given entries.
    pub(crate) fn build_archive(path: &Path, entries: &[(&str, &str)]) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        for (name, contents) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    pub(crate) const NUSPEC: &str = r#"<?xml version="1.0"?>
<package xmlns="http://schemas.microsoft.com/packaging/2015/06/nuspec.xsd">
  <metadata>
    <id>tool</id>
    <title>Tool</title>
    <version>1.2.0</version>
    <authors>Tool Authors</authors>
  </metadata>
</package>"#;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("up2date_archive_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_read_manifest_finds_nuspec_entry() {
        // Arrange
        let dir = temp_dir();
        let path = dir.join("tool.1.2.0.nupkg");
        build_archive(&path, &[("tool.nuspec", NUSPEC), ("tools/chocolateyInstall.ps1", "")]);

        // Act
        let manifest = read_manifest(&path).unwrap();

        // Assert
        assert_eq!(manifest.id, "tool");
        assert_eq!(manifest.version, "1.2.0");
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_read_manifest_without_nuspec_fails() {
        let dir = temp_dir();
        let path = dir.join("bare.nupkg");
        build_archive(&path, &[("readme.txt", "hi")]);

        assert!(matches!(read_manifest(&path), Err(ArchiveError::MissingManifest)));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_unmarked_archive_has_no_install_date() {
        let dir = temp_dir();
        let path = dir.join("tool.nupkg");
        build_archive(&path, &[("tool.nuspec", NUSPEC)]);

        assert_eq!(read_install_date(&path).unwrap(), None);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_write_marker_keeps_entries_and_replaces_old_marker() {
        // Arrange
        let dir = temp_dir();
        let path = dir.join("tool.nupkg");
        build_archive(&path, &[("tool.nuspec", NUSPEC), (".installed", "20200101000000\n")]);
        let marker = InstallMarker::parse("20240309140507").unwrap();

        // Act
        write_install_marker(&path, &marker).unwrap();

        // Assert
        assert_eq!(read_install_date(&path).unwrap().as_deref(), Some("20240309140507"));
        assert_eq!(read_manifest(&path).unwrap().title, "Tool");
        let archive = open(&path).unwrap();
        assert_eq!(archive.len(), 2);
        assert!(!temp_path(&path).exists());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_garbled_marker_still_counts_as_installed() {
        let dir = temp_dir();
        let path = dir.join("tool.nupkg");
        build_archive(&path, &[(".installed", " yesterday \n")]);

        assert_eq!(read_install_date(&path).unwrap().as_deref(), Some("yesterday"));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_write_marker_on_missing_archive_fails_cleanly() {
        let dir = temp_dir();
        let path = dir.join("missing.nupkg");

        assert!(write_install_marker(&path, &InstallMarker::now()).is_err());
        assert!(!temp_path(&path).exists());
        std::fs::remove_dir_all(dir).ok();
    }
}
