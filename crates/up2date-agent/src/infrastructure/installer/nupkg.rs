//! Package-manager archive executor.
//!
//! # Installation steps (for beginners)
//!
//! A `.nupkg` is a zip archive built for the Chocolatey package manager.  The
//! agent installs it without Chocolatey itself:
//!
//! 1. Recreate the sibling extraction directory (`tool.1.0.nupkg` →
//!    `tool.1.0/`) and extract the archive into it.
//! 2. Sanitize `tools/chocolateyInstall.ps1`: drop every line that calls
//!    `Install-BinFile` or `Register-Application`.  Those register shims and
//!    file associations for Chocolatey's own shell, which does not exist
//!    here.
//! 3. Run the sanitized script through a [`ScriptHost`].
//! 4. Write the `.installed` marker entry back into the archive so later
//!    refresh passes see the package as installed.
//!
//! Each failing step yields its own [`NupkgInstallError`] code.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use up2date_core::{
    InstallMarker, NupkgInstallError, Package, INSTALL_CANCELLED, INSTALL_FAILURE, INSTALL_SUCCESS,
};

use crate::application::setup_manager::PackageInstaller;
use crate::infrastructure::archive;

/// Install script location inside the extracted archive.
pub const INSTALL_SCRIPT: [&str; 2] = ["tools", "chocolateyInstall.ps1"];

/// Script statements removed before the install script runs.
const STRIPPED_COMMANDS: [&str; 2] = ["Install-BinFile", "Register-Application"];

/// Helper functions the install scripts expect, dot-sourced in this order.
const HELPER_SCRIPTS: [&str; 7] = [
    "Get-UninstallRegistryKey.ps1",
    "Get-AppInstallLocation.ps1",
    "Test-ProcessAdminRights.ps1",
    "Start-ChocolateyProcessAsAdmin.ps1",
    "Get-ProcessorBits.ps1",
    "Write-FunctionCallLogMessage.ps1",
    "Install-ChocolateyInstallPackage.ps1",
];

/// Runs an extracted package's install script.
pub trait ScriptHost: Send + Sync {
    /// Runs `script` from `package_dir` and returns its exit code.  Blocking.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the interpreter cannot be started.
    fn run_script(&self, package_dir: &Path, script: &Path) -> io::Result<i32>;
}

/// [`ScriptHost`] backed by Windows PowerShell.
pub struct PowerShellHost {
    interpreter: String,
    helper_scripts_dir: PathBuf,
}

impl PowerShellHost {
    pub fn new(interpreter: impl Into<String>, helper_scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            helper_scripts_dir: helper_scripts_dir.into(),
        }
    }

    /// The `-Command` text: strict errors, helpers dot-sourced, `$toolsPath`
    /// set, then the install script.
    fn command_text(&self, package_dir: &Path, script: &Path) -> String {
        let mut lines = vec![
            "$ErrorActionPreference = 'Stop'".to_string(),
            format!("Set-Location -LiteralPath {}", ps_literal(package_dir)),
        ];
        for helper in HELPER_SCRIPTS {
            let path = self.helper_scripts_dir.join(helper);
            if path.is_file() {
                lines.push(format!(". {}", ps_literal(&path)));
            } else {
                debug!("helper script {} not found", path.display());
            }
        }
        lines.push(format!("$toolsPath = {}", ps_literal(&package_dir.join("tools"))));
        lines.push(format!("& {}", ps_literal(script)));
        lines.join("; ")
    }
}

impl ScriptHost for PowerShellHost {
    fn run_script(&self, package_dir: &Path, script: &Path) -> io::Result<i32> {
        let status = Command::new(&self.interpreter)
            .args(["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-Command"])
            .arg(self.command_text(package_dir, script))
            .current_dir(package_dir)
            .status()?;
        Ok(status.code().unwrap_or(INSTALL_FAILURE))
    }
}

/// Single-quoted PowerShell string literal.
fn ps_literal(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', "''"))
}

/// Installs package-manager archives.
pub struct NupkgInstaller {
    host: Arc<dyn ScriptHost>,
}

impl NupkgInstaller {
    pub fn new(host: Arc<dyn ScriptHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl PackageInstaller for NupkgInstaller {
    async fn install(&self, package: &Package, cancel: CancellationToken) -> i32 {
        let archive_path = package.file_path.clone();
        let host = Arc::clone(&self.host);
        match tokio::task::spawn_blocking(move || install_archive(&archive_path, host.as_ref(), &cancel))
            .await
        {
            Ok(code) => code,
            Err(e) => {
                error!("installation task for {} failed: {e}", package.file_name());
                INSTALL_FAILURE
            }
        }
    }
}

/// Directory an archive is extracted into: its path without the extension.
pub fn extraction_dir(archive_path: &Path) -> PathBuf {
    archive_path.with_extension("")
}

fn install_archive(archive_path: &Path, host: &dyn ScriptHost, cancel: &CancellationToken) -> i32 {
    let dir = extraction_dir(archive_path);

    if let Err(e) = recreate_dir(&dir) {
        warn!("cannot prepare {}: {e}", dir.display());
        return NupkgInstallError::FailedToCreateDirectory.code();
    }
    if let Err(e) = archive::extract(archive_path, &dir) {
        warn!("cannot extract {}: {e}", archive_path.display());
        return NupkgInstallError::FailedToExtractArchive.code();
    }

    let script = INSTALL_SCRIPT.iter().fold(dir.clone(), |path, part| path.join(part));
    if let Err(e) = sanitize_script(&script) {
        warn!("cannot prepare {}: {e}", script.display());
        return NupkgInstallError::FailedToPrepareScript.code();
    }

    if cancel.is_cancelled() {
        info!("installation of {} cancelled before running its script", archive_path.display());
        return INSTALL_CANCELLED;
    }

    match host.run_script(&dir, &script) {
        Ok(0) => {}
        Ok(code) => {
            warn!("install script of {} exited with {code}", archive_path.display());
            return NupkgInstallError::FailedToExecuteScript.code();
        }
        Err(e) => {
            warn!("cannot run install script of {}: {e}", archive_path.display());
            return NupkgInstallError::FailedToExecuteScript.code();
        }
    }

    if let Err(e) = archive::write_install_marker(archive_path, &InstallMarker::now()) {
        warn!("cannot write install marker into {}: {e}", archive_path.display());
        return NupkgInstallError::FailedToWriteMarker.code();
    }
    INSTALL_SUCCESS
}

fn recreate_dir(dir: &Path) -> io::Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)
}

/// Drops every line of `script` that calls a stripped command.
fn sanitize_script(script: &Path) -> io::Result<()> {
    let original = std::fs::read_to_string(script)?;
    let mut sanitized = sanitize_script_text(&original);
    sanitized.push('\n');
    std::fs::write(script, sanitized)
}

fn sanitize_script_text(text: &str) -> String {
    text.lines()
        .filter(|line| !STRIPPED_COMMANDS.iter().any(|cmd| line.contains(cmd)))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::archive::tests::{build_archive, NUSPEC};
    use crate::infrastructure::installer::mock::MockScriptHost;
    use up2date_core::PackageStatus;
    use uuid::Uuid;

    const SCRIPT: &str = "$packageName = 'tool'\r\n\
        Install-ChocolateyPackage @packageArgs\r\n\
        Install-BinFile -Name tool -Path \"$toolsPath\\tool.exe\"\r\n\
        Register-Application \"$toolsPath\\tool.exe\"\r\n\
        Write-Host done";

    struct Fixture {
        dir: PathBuf,
        archive: PathBuf,
    }

    impl Fixture {
        fn new(entries: &[(&str, &str)]) -> Self {
            let dir = std::env::temp_dir().join(format!("up2date_nupkg_{}", Uuid::new_v4()));
            std::fs::create_dir_all(&dir).unwrap();
            let archive = dir.join("tool.1.2.0.nupkg");
            build_archive(&archive, entries);
            Self { dir, archive }
        }

        fn package(&self) -> Package {
            Package::new(&self.archive, PackageStatus::Downloaded)
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.dir).ok();
        }
    }

    #[test]
    fn test_sanitize_drops_shim_and_association_lines() {
        let sanitized = sanitize_script_text(SCRIPT);

        assert!(!sanitized.contains("Install-BinFile"));
        assert!(!sanitized.contains("Register-Application"));
        assert!(sanitized.contains("Install-ChocolateyPackage"));
        assert!(sanitized.contains("Write-Host done"));
    }

    #[test]
    fn test_extraction_dir_strips_only_last_extension() {
        assert_eq!(
            extraction_dir(Path::new("/dl/tool.1.2.0.nupkg")),
            PathBuf::from("/dl/tool.1.2.0")
        );
    }

    #[test]
    fn test_command_text_quotes_paths_and_sets_tools_path() {
        let host = PowerShellHost::new("powershell.exe", "/nonexistent/PS");

        let text = host.command_text(Path::new("/dl/it's"), Path::new("/dl/it's/tools/chocolateyInstall.ps1"));

        assert!(text.starts_with("$ErrorActionPreference = 'Stop'"));
        assert!(text.contains("$toolsPath = '/dl/it''s/tools'"));
        assert!(text.ends_with("& '/dl/it''s/tools/chocolateyInstall.ps1'"));
    }

    #[tokio::test]
    async fn test_successful_install_runs_sanitized_script_and_writes_marker() {
        // Arrange
        let fx = Fixture::new(&[("tool.nuspec", NUSPEC), ("tools/chocolateyInstall.ps1", SCRIPT)]);
        let host = Arc::new(MockScriptHost::returning(0));
        let installer = NupkgInstaller::new(Arc::clone(&host) as Arc<dyn ScriptHost>);

        // Act
        let code = installer.install(&fx.package(), CancellationToken::new()).await;

        // Assert
        assert_eq!(code, INSTALL_SUCCESS);
        let runs = host.runs.lock().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, fx.dir.join("tool.1.2.0"));
        assert!(!runs[0].1.contains("Install-BinFile"));
        assert!(archive::read_install_date(&fx.archive).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reinstall_replaces_previous_extraction() {
        // Arrange
        let fx = Fixture::new(&[("tools/chocolateyInstall.ps1", "Write-Host hi")]);
        let stale = fx.dir.join("tool.1.2.0").join("stale.txt");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, "old").unwrap();
        let installer = NupkgInstaller::new(Arc::new(MockScriptHost::returning(0)));

        // Act
        let code = installer.install(&fx.package(), CancellationToken::new()).await;

        // Assert
        assert_eq!(code, INSTALL_SUCCESS);
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn test_corrupt_archive_reports_extraction_failure() {
        let fx = Fixture::new(&[]);
        std::fs::write(&fx.archive, b"not a zip").unwrap();
        let installer = NupkgInstaller::new(Arc::new(MockScriptHost::returning(0)));

        let code = installer.install(&fx.package(), CancellationToken::new()).await;

        assert_eq!(code, NupkgInstallError::FailedToExtractArchive.code());
    }

    #[tokio::test]
    async fn test_missing_script_reports_preparation_failure() {
        let fx = Fixture::new(&[("tool.nuspec", NUSPEC)]);
        let installer = NupkgInstaller::new(Arc::new(MockScriptHost::returning(0)));

        let code = installer.install(&fx.package(), CancellationToken::new()).await;

        assert_eq!(code, NupkgInstallError::FailedToPrepareScript.code());
    }

    #[tokio::test]
    async fn test_failing_script_reports_execution_failure_and_leaves_no_marker() {
        // Arrange
        let fx = Fixture::new(&[("tools/chocolateyInstall.ps1", "throw 'boom'")]);
        let installer = NupkgInstaller::new(Arc::new(MockScriptHost::returning(1)));

        // Act
        let code = installer.install(&fx.package(), CancellationToken::new()).await;

        // Assert
        assert_eq!(code, NupkgInstallError::FailedToExecuteScript.code());
        assert_eq!(archive::read_install_date(&fx.archive).unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancelled_install_does_not_run_script() {
        let fx = Fixture::new(&[("tools/chocolateyInstall.ps1", "Write-Host hi")]);
        let host = Arc::new(MockScriptHost::returning(0));
        let installer = NupkgInstaller::new(Arc::clone(&host) as Arc<dyn ScriptHost>);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let code = installer.install(&fx.package(), cancel).await;

        assert_eq!(code, INSTALL_CANCELLED);
        assert!(host.runs.lock().unwrap().is_empty());
    }
}
