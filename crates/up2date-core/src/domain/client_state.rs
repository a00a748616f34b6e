//! Connection health of the agent as a whole.
//!
//! # State machine (for beginners)
//!
//! ```text
//!                 run(), no certificate
//!   Stopped ─────────────────────────────► NoCertificate
//!      │                                        │
//!      │ run(), certificate present             │ run() again
//!      ▼                                        ▼
//!   Running ◄──────────── run() again ───── Reconnecting
//!      │  │                                     ▲
//!      │  └── session call returned ────────────┘
//!      │
//!      └── authorization callback ─────────► AuthorizationError
//! ```
//!
//! Every transition goes through a method on [`ClientState`] so the
//! "`last_error` is empty while running" invariant cannot be broken by a
//! caller that forgets to clear it.

use serde::{Deserialize, Serialize};

/// Coarse connection status reported to the administrative interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientStatus {
    /// The client has never been run.
    Stopped,
    /// No (or a blank) client certificate is available.
    NoCertificate,
    /// A session with the backend is active.
    Running,
    /// The last session ended; the caller is expected to run again.
    Reconnecting,
    /// The backend rejected the client's credentials.
    AuthorizationError,
}

/// Status plus the message of the last error, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientState {
    status: ClientStatus,
    last_error: String,
}

impl Default for ClientState {
    fn default() -> Self {
        Self {
            status: ClientStatus::Stopped,
            last_error: String::new(),
        }
    }
}

impl ClientState {
    pub fn status(&self) -> ClientStatus {
        self.status
    }

    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    /// Enters `Running` and clears the last error.
    pub fn set_running(&mut self) {
        self.status = ClientStatus::Running;
        self.last_error.clear();
    }

    /// Enters `NoCertificate`.
    pub fn set_no_certificate(&mut self) {
        self.status = ClientStatus::NoCertificate;
        self.last_error.clear();
    }

    /// Enters `Reconnecting`, recording `error` (empty for a clean session end).
    pub fn set_reconnecting(&mut self, error: impl Into<String>) {
        self.status = ClientStatus::Reconnecting;
        self.last_error = error.into();
    }

    /// Enters `AuthorizationError`, recording the backend's message.
    pub fn set_authorization_error(&mut self, message: impl Into<String>) {
        self.status = ClientStatus::AuthorizationError;
        self.last_error = message.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_stopped_without_error() {
        let state = ClientState::default();
        assert_eq!(state.status(), ClientStatus::Stopped);
        assert!(state.last_error().is_empty());
    }

    #[test]
    fn test_set_running_clears_last_error() {
        // Arrange
        let mut state = ClientState::default();
        state.set_authorization_error("denied");

        // Act
        state.set_running();

        // Assert
        assert_eq!(state.status(), ClientStatus::Running);
        assert!(state.last_error().is_empty());
    }

    #[test]
    fn test_set_reconnecting_records_message() {
        let mut state = ClientState::default();
        state.set_running();
        state.set_reconnecting("socket closed");
        assert_eq!(state.status(), ClientStatus::Reconnecting);
        assert_eq!(state.last_error(), "socket closed");
    }

    #[test]
    fn test_client_state_serializes_status_as_variant_name() {
        let state = ClientState::default();
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"Stopped\""), "got {json}");
    }
}
