//! Parsers for the data embedded in package-manager archives.
//!
//! A package-manager archive (`.nupkg`) is a zip file.  Two of its entries
//! matter to the agent:
//!
//! - **the manifest** – an XML document whose name ends in `.nuspec`.  Its
//!   `id`, `title`, `version` and `authors` elements identify the package.
//! - **the install marker** – a hidden `.installed` entry the agent writes
//!   after a successful installation.  It holds a local timestamp in
//!   `yyyyMMddHHmmss` form.
//!
//! This module only parses bytes and strings; opening the zip is the
//! agent's infrastructure layer's job.

mod marker;
mod nuspec;

pub use marker::InstallMarker;
pub use nuspec::NuspecManifest;

use thiserror::Error;

/// Name of the archive entry that records a completed installation.
pub const INSTALL_MARKER_ENTRY: &str = ".installed";

/// Suffix identifying the manifest entry inside an archive.
pub const MANIFEST_SUFFIX: &str = ".nuspec";

/// Returns `true` when `entry_name` is the archive's manifest entry.
pub fn is_manifest_entry(entry_name: &str) -> bool {
    entry_name.to_ascii_lowercase().ends_with(MANIFEST_SUFFIX)
}

/// Error type for manifest and marker parsing.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest is not well-formed XML.
    #[error("malformed manifest XML: {0}")]
    Xml(#[from] quick_xml::Error),
    /// The manifest does not name the package.
    #[error("manifest has no <id> element")]
    MissingId,
    /// The install marker does not hold a `yyyyMMddHHmmss` timestamp.
    #[error("invalid install marker timestamp {0:?}")]
    InvalidMarker(String),
}
