//! # up2date-core
//!
//! Shared domain types for the up2date device agent.
//!
//! The agent keeps a managed connection to a fleet-management backend and
//! installs the packages that backend deploys.  This crate holds the parts
//! of that job that are pure data and pure rules:
//!
//! - **`domain`** – `Package` and its status lifecycle, the `ClientState`
//!   connection health record, deployment instructions, and installer result
//!   codes.
//!
//! - **`manifest`** – Parsing of the manifest embedded in package-manager
//!   archives and of the "installed" marker timestamp.
//!
//! It has no dependencies on OS APIs, child processes, or sockets.

pub mod domain;
pub mod manifest;

pub use domain::client_state::{ClientState, ClientStatus};
pub use domain::deployment::{ClientResult, DeploymentInfo, DeploymentType};
pub use domain::package::{InstalledProduct, Package, PackageFormat, PackageStatus};
pub use domain::result_codes::{
    NupkgInstallError, INSTALL_CANCELLED, INSTALL_FAILURE, INSTALL_SUCCESS, RESTART_NEEDED,
};
pub use manifest::{InstallMarker, ManifestError, NuspecManifest};
