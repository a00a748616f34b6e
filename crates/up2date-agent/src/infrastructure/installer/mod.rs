//! Installer executors, one per package format.
//!
//! - **`msi`** – Runs the platform installer silently and polls for its exit.
//! - **`nupkg`** – Extracts a package-manager archive, runs its sanitized
//!   install script, and stamps the archive with an install marker.
//! - **`mock`** – Recording installer for tests.

pub mod mock;
pub mod msi;
pub mod nupkg;
