//! Contract of the opaque native connection module.
//!
//! The native module owns the backend session and its wire protocol.  The
//! agent only sees the five calls of [`NativeClient`] and the callbacks it
//! registers through a dispatcher.
//!
//! # Threading (for beginners)
//!
//! [`NativeClient::run_client`] blocks its caller for the whole session, so
//! the connection state machine runs it on Tokio's blocking pool.  While it
//! blocks, the module invokes the [`DispatcherCallbacks`] and the
//! authorization-error callback from threads it owns.  Those threads are not
//! Tokio worker threads, which is what allows the callbacks to block on a
//! reply (see `application::deployment`).

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use up2date_core::{ClientResult, DeploymentInfo};

/// Handle of a dispatcher registered with the native module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatcherHandle(pub u64);

/// Opaque reference to a downloadable artifact, valid during its deployment
/// callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactHandle(pub u64);

/// Opaque reference to the response being built for a config request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseBuilderHandle(pub u64);

/// Errors surfaced by the native module.
#[derive(Debug, Error)]
pub enum NativeError {
    /// The session call ended with a failure; the message is reported as
    /// the client's last error.
    #[error("{0}")]
    Session(String),
    /// An artifact could not be downloaded.
    #[error("artifact download failed: {0}")]
    Download(String),
}

/// Fire-and-forget notification that the backend rejected the client's
/// credentials.
pub type AuthErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callbacks the native module invokes while a session is running.
pub trait DispatcherCallbacks: Send + Sync {
    /// Pushes key/value attributes through
    /// [`NativeClient::add_config_attribute`] before returning.
    fn on_config_request(&self, builder: ResponseBuilderHandle);

    /// Downloads and installs one artifact.  Failures are encoded in the
    /// returned [`ClientResult`].
    fn on_deployment_action(&self, artifact: ArtifactHandle, info: DeploymentInfo) -> ClientResult;

    /// Cancels the in-flight deployment `stop_id`.  Returns whether the
    /// cancellation was accepted.
    fn on_cancel_action(&self, stop_id: i32) -> bool;
}

/// The native connection module.
pub trait NativeClient: Send + Sync {
    fn create_dispatcher(&self, callbacks: Arc<dyn DispatcherCallbacks>) -> DispatcherHandle;

    fn delete_dispatcher(&self, dispatcher: DispatcherHandle);

    /// Downloads `artifact` to `destination`.  Blocking.
    ///
    /// # Errors
    ///
    /// Returns [`NativeError::Download`] when the transfer fails.
    fn download_artifact(&self, artifact: ArtifactHandle, destination: &Path) -> Result<(), NativeError>;

    fn add_config_attribute(&self, builder: ResponseBuilderHandle, key: &str, value: &str);

    /// Runs one backend session.  Blocks until the session ends.
    ///
    /// # Errors
    ///
    /// Returns [`NativeError::Session`] when the session ends with a failure.
    fn run_client(
        &self,
        certificate: &str,
        provisioning_url: &str,
        x_apig_token: &str,
        dispatcher: DispatcherHandle,
        on_auth_error: AuthErrorCallback,
    ) -> Result<(), NativeError>;
}
