//! Client: the connection state machine.
//!
//! One call to [`Client::run`] is one backend session:
//!
//! ```text
//!  certificate? ──no──► NoCertificate (native module untouched)
//!       │yes
//!       ▼
//!  create dispatcher ─► Running ─► run_client (blocks) ─► delete dispatcher
//!                          │                                   │
//!                          │ auth callback                     ▼
//!                          └──────► AuthorizationError    Reconnecting
//!                                   (sticky for this run)  (last error =
//!                                                           session error)
//! ```
//!
//! The state machine never loops on its own; the service loop in `main.rs`
//! calls `run` again after its reconnect interval.
//!
//! Only two writers ever touch [`ClientState`]: `run` itself and the
//! authorization-error callback, which fires on a native thread.  Both go
//! through the same mutex.  Each session gets a number, and a callback from
//! an earlier session is ignored.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use up2date_core::{ClientState, ClientStatus};

use super::deployment::{ChannelDispatcher, DeploymentPump, DeploymentTarget};
use super::native::{AuthErrorCallback, DispatcherCallbacks, NativeClient};

/// Yields the client certificate, or `None` when there is none.
pub trait CertificateProvider: Send + Sync {
    fn certificate(&self) -> Option<String>;
}

impl<F> CertificateProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn certificate(&self) -> Option<String> {
        self()
    }
}

/// Session parameters handed to the native module.
#[derive(Debug, Clone, Default)]
pub struct ClientSettings {
    pub provisioning_url: String,
    pub x_apig_token: String,
    /// Attributes pushed in answer to every config request.
    pub attributes: BTreeMap<String, String>,
}

/// The connection state machine.
pub struct Client {
    native: Arc<dyn NativeClient>,
    certificates: Arc<dyn CertificateProvider>,
    target: Arc<dyn DeploymentTarget>,
    provisioning_url: String,
    x_apig_token: String,
    attributes: Arc<BTreeMap<String, String>>,
    state: Arc<Mutex<ClientState>>,
    /// Number of the latest session; bumped under the state lock.
    session: Arc<AtomicU64>,
}

impl Client {
    pub fn new(
        native: Arc<dyn NativeClient>,
        certificates: Arc<dyn CertificateProvider>,
        target: Arc<dyn DeploymentTarget>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            native,
            certificates,
            target,
            provisioning_url: settings.provisioning_url,
            x_apig_token: settings.x_apig_token,
            attributes: Arc::new(settings.attributes),
            state: Arc::new(Mutex::new(ClientState::default())),
            session: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Snapshot of the current connection state.
    pub fn state(&self) -> ClientState {
        lock(&self.state).clone()
    }

    /// Runs one backend session and returns when it ends.
    pub async fn run(&self) {
        let Some(certificate) = self
            .certificates
            .certificate()
            .filter(|c| !c.trim().is_empty())
        else {
            warn!("no client certificate available; not connecting");
            lock(&self.state).set_no_certificate();
            return;
        };

        let (events, receiver) = mpsc::unbounded_channel();
        let callbacks: Arc<dyn DispatcherCallbacks> = Arc::new(ChannelDispatcher::new(events));
        let dispatcher = self.native.create_dispatcher(callbacks);
        let pump = DeploymentPump::new(
            Arc::clone(&self.native),
            Arc::clone(&self.target),
            Arc::clone(&self.attributes),
        );
        tokio::spawn(pump.run(receiver));

        let session = {
            let mut state = lock(&self.state);
            state.set_running();
            self.session.fetch_add(1, Ordering::SeqCst) + 1
        };
        info!("session {session} started against {}", self.provisioning_url);

        let native = Arc::clone(&self.native);
        let on_auth_error =
            authorization_callback(Arc::clone(&self.state), Arc::clone(&self.session), session);
        let url = self.provisioning_url.clone();
        let token = self.x_apig_token.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            native.run_client(&certificate, &url, &token, dispatcher, on_auth_error)
        })
        .await;

        self.native.delete_dispatcher(dispatcher);

        let last_error = match outcome {
            Ok(Ok(())) => String::new(),
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("session task failed: {e}"),
        };

        let mut state = lock(&self.state);
        if state.status() == ClientStatus::AuthorizationError {
            info!("session ended after authorization failure: {}", state.last_error());
            return;
        }
        if last_error.is_empty() {
            info!("session ended");
        } else {
            error!("session ended with error: {last_error}");
        }
        state.set_reconnecting(last_error);
    }
}

fn authorization_callback(
    state: Arc<Mutex<ClientState>>,
    current: Arc<AtomicU64>,
    session: u64,
) -> AuthErrorCallback {
    Arc::new(move |message: &str| {
        let mut state = lock(&state);
        if current.load(Ordering::SeqCst) != session {
            debug!("ignoring authorization error from ended session {session}: {message}");
            return;
        }
        warn!("authorization error: {message}");
        state.set_authorization_error(message);
    })
}

fn lock(state: &Mutex<ClientState>) -> std::sync::MutexGuard<'_, ClientState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::deployment::MockDeploymentTarget;
    use crate::infrastructure::native::mock::MockNativeClient;
    use std::time::Duration;

    fn client_with(native: &Arc<MockNativeClient>, certificate: Option<&str>) -> Arc<Client> {
        let certificate = certificate.map(str::to_string);
        let provider = move || certificate.clone();
        Arc::new(Client::new(
            Arc::clone(native) as Arc<dyn NativeClient>,
            Arc::new(provider),
            Arc::new(MockDeploymentTarget::new()),
            ClientSettings {
                provisioning_url: "https://dps.example/provisioning".to_string(),
                x_apig_token: "token".to_string(),
                attributes: BTreeMap::new(),
            },
        ))
    }

    async fn wait_for_session(native: &MockNativeClient, sessions: usize) {
        for _ in 0..500 {
            if native.run_calls.lock().unwrap().len() >= sessions {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run_client was never called");
    }

    #[tokio::test]
    async fn test_run_without_certificate_never_contacts_native_module() {
        for certificate in [None, Some(""), Some("   ")] {
            // Arrange
            let native = Arc::new(MockNativeClient::new());
            let client = client_with(&native, certificate);

            // Act
            client.run().await;

            // Assert
            assert_eq!(client.state().status(), ClientStatus::NoCertificate);
            assert!(native.run_calls.lock().unwrap().is_empty());
            assert_eq!(native.created_dispatchers(), 0);
        }
    }

    #[tokio::test]
    async fn test_run_passes_session_parameters() {
        // Arrange
        let native = Arc::new(MockNativeClient::new());
        native.exit_run();
        let client = client_with(&native, Some("CERT"));

        // Act
        client.run().await;

        // Assert
        let calls = native.run_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].certificate, "CERT");
        assert_eq!(calls[0].provisioning_url, "https://dps.example/provisioning");
        assert_eq!(calls[0].x_apig_token, "token");
    }

    #[tokio::test]
    async fn test_run_is_running_while_session_blocks() {
        // Arrange
        let native = Arc::new(MockNativeClient::new());
        let client = client_with(&native, Some("CERT"));
        let session = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.run().await }
        });

        // Act
        wait_for_session(&native, 1).await;
        let during = client.state();
        native.exit_run();
        session.await.unwrap();

        // Assert
        assert_eq!(during.status(), ClientStatus::Running);
        assert!(during.last_error().is_empty());
    }

    #[tokio::test]
    async fn test_normal_return_reconnects_without_error_and_deletes_dispatcher() {
        // Arrange
        let native = Arc::new(MockNativeClient::new());
        native.exit_run();
        let client = client_with(&native, Some("CERT"));

        // Act
        client.run().await;

        // Assert
        let state = client.state();
        assert_eq!(state.status(), ClientStatus::Reconnecting);
        assert!(state.last_error().is_empty());
        let run_dispatcher = native.run_calls.lock().unwrap()[0].dispatcher;
        assert_eq!(native.deleted_dispatchers.lock().unwrap().as_slice(), &[run_dispatcher]);
    }

    #[tokio::test]
    async fn test_session_error_is_recorded_as_last_error() {
        // Arrange
        let native = Arc::new(MockNativeClient::new());
        native.fail_next_run("connection reset");
        native.exit_run();
        let client = client_with(&native, Some("CERT"));

        // Act
        client.run().await;

        // Assert
        let state = client.state();
        assert_eq!(state.status(), ClientStatus::Reconnecting);
        assert_eq!(state.last_error(), "connection reset");
        assert_eq!(native.deleted_dispatchers.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_authorization_error_while_session_blocks() {
        // Arrange
        let native = Arc::new(MockNativeClient::new());
        let client = client_with(&native, Some("CERT"));
        let session = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.run().await }
        });
        wait_for_session(&native, 1).await;

        // Act
        native.trigger_auth_error("certificate revoked");
        let during = client.state();
        native.exit_run();
        session.await.unwrap();

        // Assert: visible immediately, and not overwritten by the session return
        assert_eq!(during.status(), ClientStatus::AuthorizationError);
        assert_eq!(during.last_error(), "certificate revoked");
        assert_eq!(client.state().status(), ClientStatus::AuthorizationError);
        assert_eq!(client.state().last_error(), "certificate revoked");
    }

    #[tokio::test]
    async fn test_next_run_clears_authorization_error() {
        // Arrange
        let native = Arc::new(MockNativeClient::new());
        let client = client_with(&native, Some("CERT"));
        let session = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.run().await }
        });
        wait_for_session(&native, 1).await;
        native.trigger_auth_error("denied");
        native.exit_run();
        session.await.unwrap();

        // Act
        native.exit_run();
        client.run().await;

        // Assert
        assert_eq!(client.state().status(), ClientStatus::Reconnecting);
        assert!(client.state().last_error().is_empty());
    }

    #[tokio::test]
    async fn test_late_authorization_error_from_ended_session_is_ignored() {
        // Arrange: first session ends, its callback stays reachable
        let native = Arc::new(MockNativeClient::new());
        let client = client_with(&native, Some("CERT"));
        native.exit_run();
        client.run().await;
        let stale = native.auth_callback().unwrap();
        let session = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.run().await }
        });
        wait_for_session(&native, 2).await;

        // Act
        stale("expired token from the old session");
        let during = client.state();
        native.exit_run();
        session.await.unwrap();

        // Assert
        assert_eq!(during.status(), ClientStatus::Running);
        assert!(during.last_error().is_empty());
        assert_eq!(client.state().status(), ClientStatus::Reconnecting);
    }
}
