//! Deployment instructions received from the backend and the result handed
//! back to it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the backend wants a deployment step handled.
///
/// The backend sends these as lowercase strings (`"skip"`, `"attempt"`,
/// `"forced"`).  Anything unrecognised is treated as `Attempt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentType {
    /// Do not perform this step.
    Skip,
    /// Perform the step when convenient.
    #[default]
    Attempt,
    /// Perform the step immediately.
    Forced,
}

impl FromStr for DeploymentType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Self::Skip,
            "forced" => Self::Forced,
            _ => Self::Attempt,
        })
    }
}

impl fmt::Display for DeploymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Skip => "skip",
            Self::Attempt => "attempt",
            Self::Forced => "forced",
        };
        f.write_str(s)
    }
}

/// Metadata accompanying a deployment action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentInfo {
    /// Backend deployment identifier; cancel requests refer to it.
    pub id: i32,
    /// File name the artifact is stored under in the download directory.
    pub artifact_file_name: String,
    /// Artifact size in bytes, as announced by the backend.
    pub artifact_size: u64,
    pub download_type: DeploymentType,
    pub update_type: DeploymentType,
    /// `false` when the backend asks to postpone installation.
    pub is_in_maintenance_window: bool,
}

impl DeploymentInfo {
    /// Creates an `attempt`/`attempt` deployment inside its maintenance window.
    pub fn new(id: i32, artifact_file_name: impl Into<String>) -> Self {
        Self {
            id,
            artifact_file_name: artifact_file_name.into(),
            artifact_size: 0,
            download_type: DeploymentType::Attempt,
            update_type: DeploymentType::Attempt,
            is_in_maintenance_window: true,
        }
    }

    /// Returns `true` when the artifact should be downloaded.
    pub fn should_download(&self) -> bool {
        self.download_type != DeploymentType::Skip
    }

    /// Returns `true` when the downloaded artifact should also be installed.
    pub fn should_install(&self) -> bool {
        self.update_type != DeploymentType::Skip && self.is_in_maintenance_window
    }
}

/// Outcome of a deployment action as reported back to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientResult {
    pub success: bool,
    pub message: String,
}

impl ClientResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_type_parses_backend_strings() {
        assert_eq!("skip".parse::<DeploymentType>().unwrap(), DeploymentType::Skip);
        assert_eq!("Forced".parse::<DeploymentType>().unwrap(), DeploymentType::Forced);
        assert_eq!("attempt".parse::<DeploymentType>().unwrap(), DeploymentType::Attempt);
        assert_eq!("whatever".parse::<DeploymentType>().unwrap(), DeploymentType::Attempt);
    }

    #[test]
    fn test_should_install_requires_maintenance_window() {
        // Arrange
        let mut info = DeploymentInfo::new(7, "app.msi");
        info.is_in_maintenance_window = false;

        // Assert
        assert!(info.should_download());
        assert!(!info.should_install());
    }

    #[test]
    fn test_skip_update_type_downloads_only() {
        let mut info = DeploymentInfo::new(7, "app.msi");
        info.update_type = DeploymentType::Skip;
        assert!(info.should_download());
        assert!(!info.should_install());
    }

    #[test]
    fn test_client_result_constructors() {
        assert!(ClientResult::success("ok").success);
        let failed = ClientResult::failure("boom");
        assert!(!failed.success);
        assert_eq!(failed.message, "boom");
    }
}
