//! Infrastructure layer for the agent.
//!
//! Contains OS-facing adapters: installer executors, installation
//! detectors, archive access, configuration storage, and the administrative
//! command bridge.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `up2date_core`, but MUST NOT be imported by the `application` layer
//! outside of tests.
//!
//! # Sub-modules
//!
//! - **`installer`** – `MsiInstaller` and `NupkgInstaller`, the two
//!   `PackageInstaller` implementations, plus recording mocks.
//!
//! - **`detector`** – The Windows uninstall registry and Chocolatey
//!   detectors, chained behind one `InstallationDetector`.
//!
//! - **`inspector`** – Reads product identity out of `.msi` databases and
//!   `.nupkg` archives.
//!
//! - **`archive`** – Zip access for package-manager archives: extraction,
//!   manifest lookup, and the embedded install marker.
//!
//! - **`native`** – Implementations of the native connection module
//!   contract.  Only the recording mock ships in this crate.
//!
//! - **`certificate`** – Reads the client certificate from disk.
//!
//! - **`system_info`** – Host description and config-request attributes.
//!
//! - **`storage`** – TOML configuration file.
//!
//! - **`admin_bridge`** – Command handlers that expose agent state to the
//!   administration tool.

pub mod admin_bridge;
pub mod archive;
pub mod certificate;
pub mod detector;
pub mod inspector;
pub mod installer;
pub mod native;
pub mod storage;
pub mod system_info;
