//! up2date-agent library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does the agent do? (for beginners)
//!
//! The agent runs as a background service on a managed device.  A
//! fleet-management backend decides which software each device should have;
//! the agent makes it so:
//!
//! 1. It keeps a session open to the backend through the native connection
//!    module, authenticating with the device's client certificate, and
//!    reconnects whenever the session ends.
//! 2. When the backend asks for configuration, it answers with a set of
//!    attributes describing the device.
//! 3. When the backend deploys a package, it downloads the artifact into the
//!    download directory and, unless the deployment says otherwise, installs
//!    it straight away.
//! 4. It keeps a registry of every package in the download directory and
//!    whether that package is installed on the host, reconciling it with the
//!    OS view (uninstall registry, Chocolatey) on every refresh.
//! 5. It reports installation results back to the backend and exposes its
//!    state to a local administration tool.

/// Application layer: the connection and package installation state
/// machines.
pub mod application;

/// Infrastructure layer: installers, detectors, archives, config, and the
/// admin bridge.
pub mod infrastructure;
