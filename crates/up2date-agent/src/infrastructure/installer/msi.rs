//! Silent native-installer executor.
//!
//! Spawns `msiexec.exe /i "<package>" ALLUSERS=1 /qn` and polls the child
//! every `poll_interval`.  The cancellation token is checked on every tick;
//! on cancellation the child is killed and the run reports
//! [`INSTALL_CANCELLED`].

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use up2date_core::{Package, INSTALL_CANCELLED, INSTALL_FAILURE};

use crate::application::setup_manager::PackageInstaller;

/// Placeholder in the argument template replaced by the package path.
pub const PACKAGE_PLACEHOLDER: &str = "{package}";

/// Default polling period for installer completion.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct MsiInstaller {
    program: String,
    args: Vec<String>,
    poll_interval: Duration,
}

impl MsiInstaller {
    /// The standard `msiexec` invocation.
    pub fn new(poll_interval: Duration) -> Self {
        Self::with_command(
            "msiexec.exe",
            ["/i", PACKAGE_PLACEHOLDER, "ALLUSERS=1", "/qn"],
            poll_interval,
        )
    }

    /// A custom installer command.  Occurrences of [`PACKAGE_PLACEHOLDER`] in
    /// `args` are replaced with the package path.
    pub fn with_command<I, S>(program: impl Into<String>, args: I, poll_interval: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            poll_interval,
        }
    }

    fn command_args(&self, package: &Path) -> Vec<OsString> {
        self.args
            .iter()
            .map(|arg| {
                if arg == PACKAGE_PLACEHOLDER {
                    package.as_os_str().to_os_string()
                } else {
                    OsString::from(arg.replace(PACKAGE_PLACEHOLDER, &package.to_string_lossy()))
                }
            })
            .collect()
    }
}

#[async_trait]
impl PackageInstaller for MsiInstaller {
    async fn install(&self, package: &Package, cancel: CancellationToken) -> i32 {
        let mut child = match Command::new(&self.program)
            .args(self.command_args(&package.file_path))
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!("cannot start {} for {}: {e}", self.program, package.file_name());
                return INSTALL_FAILURE;
            }
        };
        debug!("{} started for {}", self.program, package.file_name());

        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("installation of {} cancelled, stopping installer", package.file_name());
                    if let Err(e) = child.kill().await {
                        warn!("cannot stop installer: {e}");
                    }
                    return INSTALL_CANCELLED;
                }
                _ = ticker.tick() => match child.try_wait() {
                    Ok(Some(status)) => return status.code().unwrap_or(INSTALL_FAILURE),
                    Ok(None) => {}
                    Err(e) => {
                        error!("cannot poll installer for {}: {e}", package.file_name());
                        return INSTALL_FAILURE;
                    }
                },
            }
        }
    }
}
