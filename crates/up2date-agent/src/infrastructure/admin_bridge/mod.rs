//! Command bridge for the administrative interface.
//!
//! Exposes agent state (packages, connection status, device identity) to a
//! local administration tool.  Follows Clean Architecture: only this module
//! references both the application layer and the transport that carries the
//! commands, so the transport can change without touching the state machines.
//!
//! # How the commands are used (for beginners)
//!
//! The administration tool sends a command name plus JSON arguments; the
//! transport calls the matching `async fn` here and sends its
//! [`CommandResult`] back as JSON:
//!
//! ```text
//! Admin tool                  transport              agent
//! ─────────────────────────────────────────────────────────────
//! "get_packages"  ────────────────────────────────>  get_packages()
//!                 <────────────────────────────────  [PackageDto, ...]
//! ```
//!
//! # DTOs (Data Transfer Objects)
//!
//! The application types hold paths, handles, and locks that do not belong
//! on the wire.  The DTO structs are plain serializable snapshots built fresh
//! for each call.
//!
//! # `CommandResult<T>`
//!
//! All commands return `CommandResult<T>`, a unified envelope:
//! ```json
//! { "success": true,  "data": {...}, "error": null  }
//! { "success": false, "data": null,  "error": "..."  }
//! ```
//! so the caller can use one error-handling pattern for every command.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;
use up2date_core::Package;

use crate::application::connection::{CertificateProvider, Client};
use crate::application::setup_manager::SetupManager;
use crate::infrastructure::system_info::SystemInfo;

// ── Shared agent state ────────────────────────────────────────────────────────

/// Everything the commands read from.
pub struct AgentState {
    pub setup: SetupManager,
    pub client: Arc<Client>,
    pub certificates: Arc<dyn CertificateProvider>,
    pub device_id: String,
    pub system_info: SystemInfo,
    /// Cancelled on service shutdown; installs started from the admin
    /// interface run under a child of it.
    pub shutdown: CancellationToken,
}

// ── DTOs ──────────────────────────────────────────────────────────────────────

/// One package as shown in the administration tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDto {
    pub file_name: String,
    pub product_name: Option<String>,
    pub display_name: Option<String>,
    pub display_version: Option<String>,
    pub publisher: Option<String>,
    pub install_date: Option<String>,
    /// Status variant name, e.g. `"Downloaded"` or `"Installed"`.
    pub status: String,
    pub error_code: i32,
}

impl From<&Package> for PackageDto {
    fn from(package: &Package) -> Self {
        Self {
            file_name: package.file_name(),
            product_name: package.product_name.clone(),
            display_name: package.display_name.clone(),
            display_version: package.display_version.clone(),
            publisher: package.publisher.clone(),
            install_date: package.install_date.clone(),
            status: format!("{:?}", package.status),
            error_code: package.error_code,
        }
    }
}

/// Connection state snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStateDto {
    /// Status variant name, e.g. `"Running"`.
    pub status: String,
    pub last_error: String,
}

/// Unified response wrapper for admin commands.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResult<T: Serialize> {
    /// `true` if the command completed successfully; `false` on error.
    pub success: bool,
    /// The command's return value, present only when `success` is `true`.
    pub data: Option<T>,
    /// A human-readable error message, present only when `success` is `false`.
    pub error: Option<String>,
}

impl<T: Serialize> CommandResult<T> {
    /// Constructs a successful result containing `data`.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Constructs an error result containing the given message.
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Refreshes the package registry and returns every package.
pub async fn get_packages(state: Arc<AgentState>) -> CommandResult<Vec<PackageDto>> {
    let packages = state.setup.available_packages().await;
    CommandResult::ok(packages.iter().map(PackageDto::from).collect())
}

/// Starts installing the named packages in the background.
///
/// Returns as soon as the installation is queued; progress is observed via
/// `get_packages`.  Names that are not known packages are rejected up front
/// so the caller learns about typos immediately.
pub async fn start_installation(
    state: Arc<AgentState>,
    file_names: Vec<String>,
) -> CommandResult<usize> {
    if file_names.is_empty() {
        return CommandResult::err("no packages selected");
    }
    let unknown: Vec<&str> = file_names
        .iter()
        .filter(|name| state.setup.find_package(name).is_none())
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return CommandResult::err(format!("unknown packages: {}", unknown.join(", ")));
    }

    info!("installation of {} package(s) requested", file_names.len());
    let count = file_names.len();
    let setup = state.setup.clone();
    let cancel = state.shutdown.child_token();
    tokio::spawn(async move {
        setup.install_packages(&file_names, cancel).await;
    });
    CommandResult::ok(count)
}

/// Returns the connection state.
pub async fn get_client_state(state: Arc<AgentState>) -> CommandResult<ClientStateDto> {
    let client_state = state.client.state();
    CommandResult::ok(ClientStateDto {
        status: format!("{:?}", client_state.status()),
        last_error: client_state.last_error().to_string(),
    })
}

pub async fn get_device_id(state: Arc<AgentState>) -> CommandResult<String> {
    CommandResult::ok(state.device_id.clone())
}

pub async fn is_certificate_available(state: Arc<AgentState>) -> CommandResult<bool> {
    CommandResult::ok(state.certificates.certificate().is_some())
}

/// Returns the download directory packages are read from.
pub async fn get_download_folder(state: Arc<AgentState>) -> CommandResult<String> {
    CommandResult::ok(state.setup.download_location().display().to_string())
}

pub async fn get_system_info(state: Arc<AgentState>) -> CommandResult<SystemInfo> {
    CommandResult::ok(state.system_info.clone())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::connection::ClientSettings;
    use crate::application::deployment::DeploymentTarget;
    use crate::application::native::NativeClient;
    use crate::application::setup_manager::{
        InstallationDetector, PackageInspector, PackageInstaller, SetupDependencies,
    };
    use crate::infrastructure::detector::mock::MockDetector;
    use crate::infrastructure::inspector::mock::MockInspector;
    use crate::infrastructure::installer::mock::MockInstaller;
    use crate::infrastructure::native::mock::MockNativeClient;
    use std::path::PathBuf;
    use std::time::Duration;
    use uuid::Uuid;

    struct Fixture {
        dir: PathBuf,
        msi: Arc<MockInstaller>,
        state: Arc<AgentState>,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.dir).ok();
        }
    }

    fn make_state(certificate: Option<&'static str>) -> Fixture {
        let dir = std::env::temp_dir().join(format!("up2date_admin_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("app.msi"), b"payload").unwrap();

        let msi = Arc::new(MockInstaller::returning(0));
        let deps = SetupDependencies {
            inspector: Arc::new(MockInspector::new()) as Arc<dyn PackageInspector>,
            detector: Arc::new(MockDetector::new()) as Arc<dyn InstallationDetector>,
            native_installer: Arc::clone(&msi) as Arc<dyn PackageInstaller>,
            package_manager_installer: Arc::new(MockInstaller::returning(0)) as Arc<dyn PackageInstaller>,
        };
        let setup = SetupManager::new(&dir, deps, None).unwrap();

        let certificates: Arc<dyn CertificateProvider> =
            Arc::new(move || certificate.map(str::to_string));
        let client = Arc::new(Client::new(
            Arc::new(MockNativeClient::new()) as Arc<dyn NativeClient>,
            Arc::clone(&certificates),
            Arc::new(setup.clone()) as Arc<dyn DeploymentTarget>,
            ClientSettings::default(),
        ));

        let state = Arc::new(AgentState {
            setup,
            client,
            certificates,
            device_id: "device-1".to_string(),
            system_info: SystemInfo::collect(),
            shutdown: CancellationToken::new(),
        });
        Fixture { dir, msi, state }
    }

    #[tokio::test]
    async fn test_get_packages_lists_downloaded_files() {
        // Arrange
        let fx = make_state(None);

        // Act
        let result = get_packages(Arc::clone(&fx.state)).await;

        // Assert
        assert!(result.success);
        let packages = result.data.unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].file_name, "app.msi");
        assert_eq!(packages[0].status, "Downloaded");
    }

    #[tokio::test]
    async fn test_start_installation_runs_in_background() {
        // Arrange
        let fx = make_state(None);

        // Act
        let result = start_installation(Arc::clone(&fx.state), vec!["APP.msi".to_string()]).await;

        // Assert
        assert!(result.success);
        assert_eq!(result.data, Some(1));
        for _ in 0..100 {
            if !fx.msi.installed_paths().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fx.msi.installed_paths(), vec![fx.dir.join("app.msi")]);
    }

    #[tokio::test]
    async fn test_start_installation_rejects_unknown_names() {
        // Arrange
        let fx = make_state(None);

        // Act
        let result = start_installation(
            Arc::clone(&fx.state),
            vec!["app.msi".to_string(), "ghost.msi".to_string()],
        )
        .await;

        // Assert
        assert!(!result.success);
        assert!(result.error.unwrap().contains("ghost.msi"));
        assert!(fx.msi.installed_paths().is_empty());
    }

    #[tokio::test]
    async fn test_start_installation_rejects_empty_selection() {
        let fx = make_state(None);

        let result = start_installation(Arc::clone(&fx.state), Vec::new()).await;

        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_get_client_state_is_stopped_before_first_run() {
        let fx = make_state(None);

        let dto = get_client_state(Arc::clone(&fx.state)).await.data.unwrap();

        assert_eq!(dto.status, "Stopped");
        assert!(dto.last_error.is_empty());
    }

    #[tokio::test]
    async fn test_get_client_state_reports_no_certificate_after_run() {
        // Arrange
        let fx = make_state(None);

        // Act
        fx.state.client.run().await;
        let dto = get_client_state(Arc::clone(&fx.state)).await.data.unwrap();

        // Assert
        assert_eq!(dto.status, "NoCertificate");
    }

    #[tokio::test]
    async fn test_identity_commands_return_configured_values() {
        let fx = make_state(Some("PEM"));

        assert_eq!(get_device_id(Arc::clone(&fx.state)).await.data.unwrap(), "device-1");
        assert_eq!(is_certificate_available(Arc::clone(&fx.state)).await.data, Some(true));
        assert_eq!(
            get_download_folder(Arc::clone(&fx.state)).await.data.unwrap(),
            fx.dir.display().to_string()
        );
        assert_eq!(
            get_system_info(Arc::clone(&fx.state)).await.data.unwrap(),
            fx.state.system_info
        );
    }

    #[tokio::test]
    async fn test_is_certificate_available_false_without_certificate() {
        let fx = make_state(None);

        assert_eq!(is_certificate_available(Arc::clone(&fx.state)).await.data, Some(false));
    }

    #[test]
    fn test_command_result_ok_sets_success_true() {
        let r: CommandResult<u32> = CommandResult::ok(99);
        assert!(r.success);
        assert_eq!(r.data.unwrap(), 99);
        assert!(r.error.is_none());
    }

    #[test]
    fn test_command_result_err_serializes_null_data() {
        let r: CommandResult<u32> = CommandResult::err("oops");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["data"].is_null());
        assert_eq!(json["error"], "oops");
    }
}
