//! Recording stand-in for the native connection module.
//!
//! `MockNativeClient` records every call in a `Mutex<Vec<...>>` so tests can
//! assert on exactly what the agent asked for.
//!
//! # Blocking sessions
//!
//! `run_client` blocks like the real module does.  Each call waits for one
//! "exit" permit released by [`MockNativeClient::exit_run`].  Releasing the
//! permit before `run` starts makes the session return immediately; releasing
//! it later lets a test observe the state while the session is active.
//!
//! A test that starts a session must release a permit before it finishes,
//! otherwise the runtime waits forever for the blocking task on shutdown.
//!
//! # Triggering callbacks
//!
//! [`MockNativeClient::dispatcher_callbacks`] returns the callbacks of the
//! live dispatcher.  Invoke them from a plain thread or `spawn_blocking`,
//! never directly from async test code: they block on their reply.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::application::native::{
    ArtifactHandle, AuthErrorCallback, DispatcherCallbacks, DispatcherHandle, NativeClient,
    NativeError, ResponseBuilderHandle,
};

/// Parameters of one `run_client` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunClientCall {
    pub certificate: String,
    pub provisioning_url: String,
    pub x_apig_token: String,
    pub dispatcher: DispatcherHandle,
}

/// A native module that records calls and blocks sessions until released.
#[derive(Default)]
pub struct MockNativeClient {
    pub run_calls: Mutex<Vec<RunClientCall>>,
    pub deleted_dispatchers: Mutex<Vec<DispatcherHandle>>,
    pub downloads: Mutex<Vec<(ArtifactHandle, PathBuf)>>,
    pub config_attributes: Mutex<Vec<(ResponseBuilderHandle, String, String)>>,
    /// When `true`, `download_artifact` fails without writing anything.
    pub should_fail_download: bool,
    /// Bytes `download_artifact` writes to the destination.
    pub artifact_contents: Vec<u8>,
    next_dispatcher: AtomicU64,
    dispatchers: Mutex<HashMap<DispatcherHandle, Arc<dyn DispatcherCallbacks>>>,
    auth_callback: Mutex<Option<AuthErrorCallback>>,
    run_error: Mutex<Option<String>>,
    exit_permits: Mutex<usize>,
    exit_signal: Condvar,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockNativeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A native module whose downloads always fail.
    pub fn failing_downloads() -> Self {
        Self {
            should_fail_download: true,
            ..Self::default()
        }
    }

    /// Lets one blocked (or future) `run_client` call return.
    pub fn exit_run(&self) {
        *lock(&self.exit_permits) += 1;
        self.exit_signal.notify_all();
    }

    /// Makes the next `run_client` call return `NativeError::Session`.
    pub fn fail_next_run(&self, message: impl Into<String>) {
        *lock(&self.run_error) = Some(message.into());
    }

    /// Invokes the authorization-error callback of the latest session.
    ///
    /// Returns `false` if no session has registered one yet.
    pub fn trigger_auth_error(&self, message: &str) -> bool {
        let callback = lock(&self.auth_callback).clone();
        match callback {
            Some(callback) => {
                callback(message);
                true
            }
            None => false,
        }
    }

    /// The authorization-error callback of the latest session.
    pub fn auth_callback(&self) -> Option<AuthErrorCallback> {
        lock(&self.auth_callback).clone()
    }

    /// Callbacks of the most recently created dispatcher that is still live.
    pub fn dispatcher_callbacks(&self) -> Option<Arc<dyn DispatcherCallbacks>> {
        lock(&self.dispatchers)
            .iter()
            .max_by_key(|(handle, _)| handle.0)
            .map(|(_, callbacks)| Arc::clone(callbacks))
    }

    /// Number of dispatchers created so far.
    pub fn created_dispatchers(&self) -> u64 {
        self.next_dispatcher.load(Ordering::SeqCst)
    }

    fn wait_for_exit(&self) {
        let mut permits = lock(&self.exit_permits);
        while *permits == 0 {
            permits = self
                .exit_signal
                .wait(permits)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *permits -= 1;
    }
}

impl NativeClient for MockNativeClient {
    fn create_dispatcher(&self, callbacks: Arc<dyn DispatcherCallbacks>) -> DispatcherHandle {
        let handle = DispatcherHandle(self.next_dispatcher.fetch_add(1, Ordering::SeqCst) + 1);
        lock(&self.dispatchers).insert(handle, callbacks);
        debug!("mock native: created dispatcher {}", handle.0);
        handle
    }

    fn delete_dispatcher(&self, dispatcher: DispatcherHandle) {
        lock(&self.dispatchers).remove(&dispatcher);
        lock(&self.deleted_dispatchers).push(dispatcher);
    }

    fn download_artifact(&self, artifact: ArtifactHandle, destination: &Path) -> Result<(), NativeError> {
        lock(&self.downloads).push((artifact, destination.to_path_buf()));
        if self.should_fail_download {
            return Err(NativeError::Download(format!("artifact {} unavailable", artifact.0)));
        }
        std::fs::write(destination, &self.artifact_contents)
            .map_err(|e| NativeError::Download(e.to_string()))
    }

    fn add_config_attribute(&self, builder: ResponseBuilderHandle, key: &str, value: &str) {
        lock(&self.config_attributes).push((builder, key.to_string(), value.to_string()));
    }

    fn run_client(
        &self,
        certificate: &str,
        provisioning_url: &str,
        x_apig_token: &str,
        dispatcher: DispatcherHandle,
        on_auth_error: AuthErrorCallback,
    ) -> Result<(), NativeError> {
        lock(&self.run_calls).push(RunClientCall {
            certificate: certificate.to_string(),
            provisioning_url: provisioning_url.to_string(),
            x_apig_token: x_apig_token.to_string(),
            dispatcher,
        });
        *lock(&self.auth_callback) = Some(on_auth_error);

        self.wait_for_exit();

        match lock(&self.run_error).take() {
            Some(message) => Err(NativeError::Session(message)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_permit_released_before_run_returns_immediately() {
        // Arrange
        let native = MockNativeClient::new();
        native.exit_run();

        // Act
        let result = native.run_client("c", "u", "t", DispatcherHandle(1), Arc::new(|_: &str| {}));

        // Assert
        assert!(result.is_ok());
        assert_eq!(native.run_calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_download_writes_artifact_contents() {
        let dir = std::env::temp_dir().join(format!("up2date_native_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let native = MockNativeClient {
            artifact_contents: b"MSI".to_vec(),
            ..MockNativeClient::default()
        };

        native.download_artifact(ArtifactHandle(9), &dir.join("a.msi")).unwrap();

        assert_eq!(std::fs::read(dir.join("a.msi")).unwrap(), b"MSI");
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_deleted_dispatcher_callbacks_are_released() {
        struct Nop;
        impl DispatcherCallbacks for Nop {
            fn on_config_request(&self, _: ResponseBuilderHandle) {}
            fn on_deployment_action(
                &self,
                _: ArtifactHandle,
                _: up2date_core::DeploymentInfo,
            ) -> up2date_core::ClientResult {
                up2date_core::ClientResult::success("")
            }
            fn on_cancel_action(&self, _: i32) -> bool {
                false
            }
        }

        let native = MockNativeClient::new();
        let handle = native.create_dispatcher(Arc::new(Nop));
        assert!(native.dispatcher_callbacks().is_some());

        native.delete_dispatcher(handle);

        assert!(native.dispatcher_callbacks().is_none());
    }
}
