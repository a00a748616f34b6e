//! Application layer: the agent's two state machines and their ports.
//!
//! # What lives here?
//!
//! - **`connection`** – `Client`, the connection state machine.  Runs one
//!   backend session per call and tracks `ClientState`.
//!
//! - **`native`** – The `NativeClient` trait describing the opaque native
//!   connection module, plus the callback contract it invokes.
//!
//! - **`deployment`** – Turns native callbacks into channel messages and
//!   drives each deployment (download, then install) against a
//!   `DeploymentTarget`.
//!
//! - **`registry`** – `PackageRegistry`, the mutex-guarded package list.
//!
//! - **`setup_manager`** – `SetupManager`, the package installation state
//!   machine, and the traits for the detector, inspector and installers it
//!   drives.
//!
//! Traits are defined here and implemented in `infrastructure`, so this layer
//! never depends on an OS API directly.

pub mod connection;
pub mod deployment;
pub mod native;
pub mod registry;
pub mod setup_manager;
