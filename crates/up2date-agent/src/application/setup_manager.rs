//! SetupManager: the package installation state machine.
//!
//! The setup manager owns the [`PackageRegistry`] and keeps it in step with
//! three sources of truth:
//!
//! 1. **The download directory** – every file in it is a package; a package
//!    whose file disappeared is dropped (unless it is still downloading).
//! 2. **The installation detector** – the OS view of which product codes are
//!    installed, with display metadata.
//! 3. **The archive itself** – package-manager archives carry their own
//!    manifest and, once installed, an `.installed` marker entry.
//!
//! # Precedence
//!
//! For package-manager archives the embedded marker always wins: a marker
//! means `Installed`, whatever the detector says.  Without a marker, a
//! detector record for the archive's id counts only when its version is the
//! manifest version.  For every other format the detector decides.  Transient statuses (`Downloading`, `Installing`) are
//! never overwritten by a refresh.
//!
//! # Collaborators
//!
//! Everything OS-facing sits behind a trait defined here and implemented in
//! the infrastructure layer:
//!
//! - [`PackageInspector`] – reads product code/name and embedded install state
//!   out of installer files.
//! - [`InstallationDetector`] – lists the products installed on the host.
//! - [`PackageInstaller`] – runs one installation and returns its raw result
//!   code.  There is one installer per [`PackageFormat`].
//!
//! # Threading
//!
//! `SetupManager` is a cheap `Clone` handle.  A refresh pass does blocking
//! file and process I/O; async callers use [`SetupManager::refresh`], which
//! moves the pass onto Tokio's blocking pool.  Refresh passes are serialized
//! with each other, and installations are serialized with each other, but a
//! refresh may run while an install is in progress: the registry's
//! compare-and-replace commit keeps whatever the install published.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use up2date_core::{InstalledProduct, NuspecManifest, Package, PackageFormat, PackageStatus};

use super::deployment::DeploymentTarget;
use super::registry::PackageRegistry;

/// Error type for setup manager operations.
#[derive(Debug, Error)]
pub enum SetupError {
    /// No installable package with this file name is known.
    #[error("package {0} is not available")]
    PackageNotAvailable(String),
    /// The file exists but no installer handles its format.
    #[error("package {0} has an unsupported format")]
    UnsupportedFormat(String),
    /// Cancelled before the installer started.
    #[error("installation of {0} cancelled")]
    Cancelled(String),
    /// The download directory could not be created.
    #[error("cannot prepare download location {path}: {source}")]
    DownloadLocation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Error type for installation detectors.
#[derive(Debug, Error)]
pub enum DetectionError {
    /// The detector backend is not present on this host.
    #[error("detector backend unavailable: {0}")]
    Unavailable(String),
    /// The backend was present but the query failed.
    #[error("detector query failed: {0}")]
    Query(String),
    #[error("detector I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error type for package file inspection.
#[derive(Debug, Error)]
pub enum InspectionError {
    #[error("cannot read {path}: {message}")]
    Unreadable { path: PathBuf, message: String },
    #[error("archive {0} has no manifest entry")]
    MissingManifest(PathBuf),
    #[error("invalid manifest in {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: up2date_core::ManifestError,
    },
}

/// Identity read from an installer file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageMetadata {
    pub product_code: Option<String>,
    pub product_name: Option<String>,
}

/// Install state embedded in a package-manager archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddedInstallState {
    /// Contents of the `.installed` marker, if the archive carries one.
    pub install_date: Option<String>,
    /// The archive's manifest, if it could be read.
    pub manifest: Option<NuspecManifest>,
}

/// Reads identity and embedded state out of installer files.
pub trait PackageInspector: Send + Sync {
    /// Extracts product code and name, by format.  Unknown formats yield
    /// empty metadata.
    ///
    /// # Errors
    ///
    /// Returns [`InspectionError`] when the file cannot be read or parsed.
    fn metadata(&self, path: &Path) -> Result<PackageMetadata, InspectionError>;

    /// Reads the install marker and manifest of a package-manager archive.
    ///
    /// # Errors
    ///
    /// Returns [`InspectionError`] when the archive cannot be opened.
    fn embedded_state(&self, path: &Path) -> Result<EmbeddedInstallState, InspectionError>;
}

/// Answers "which products are installed on this host".
pub trait InstallationDetector: Send + Sync {
    /// Takes one snapshot of installed products.  Called once per refresh
    /// pass.
    ///
    /// # Errors
    ///
    /// Returns [`DetectionError`] when the backend cannot be queried.
    fn installed_products(&self) -> Result<Vec<InstalledProduct>, DetectionError>;
}

/// Runs one installation.
///
/// Implementations never fail in the `Result` sense: every failure is
/// expressed as a non-zero result code.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn install(&self, package: &Package, cancel: CancellationToken) -> i32;
}

/// Callback invoked after each installation with the final package and the
/// raw result code.
pub type SetupFinishedHook = Arc<dyn Fn(&Package, i32) + Send + Sync>;

/// Collaborators the setup manager drives.
#[derive(Clone)]
pub struct SetupDependencies {
    pub inspector: Arc<dyn PackageInspector>,
    pub detector: Arc<dyn InstallationDetector>,
    pub native_installer: Arc<dyn PackageInstaller>,
    pub package_manager_installer: Arc<dyn PackageInstaller>,
}

struct SetupInner {
    download_location: PathBuf,
    registry: PackageRegistry,
    deps: SetupDependencies,
    on_setup_finished: Option<SetupFinishedHook>,
    refresh_lock: Mutex<()>,
    install_lock: tokio::sync::Mutex<()>,
}

/// Handle to the package installation state machine.
#[derive(Clone)]
pub struct SetupManager {
    inner: Arc<SetupInner>,
}

impl SetupManager {
    /// Creates the manager, creating the download directory if needed, and
    /// performs the initial refresh pass.
    ///
    /// This does blocking I/O; call it before entering async code or from a
    /// blocking task.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::DownloadLocation`] if the download directory
    /// cannot be created.
    pub fn new(
        download_location: impl Into<PathBuf>,
        deps: SetupDependencies,
        on_setup_finished: Option<SetupFinishedHook>,
    ) -> Result<Self, SetupError> {
        let download_location = download_location.into();
        std::fs::create_dir_all(&download_location).map_err(|source| {
            SetupError::DownloadLocation {
                path: download_location.clone(),
                source,
            }
        })?;

        let manager = Self {
            inner: Arc::new(SetupInner {
                download_location,
                registry: PackageRegistry::new(),
                deps,
                on_setup_finished,
                refresh_lock: Mutex::new(()),
                install_lock: tokio::sync::Mutex::new(()),
            }),
        };
        manager.refresh_package_list();
        Ok(manager)
    }

    pub fn download_location(&self) -> &Path {
        &self.inner.download_location
    }

    /// Snapshot of the registry without refreshing it first.
    pub fn packages(&self) -> Vec<Package> {
        self.inner.registry.snapshot()
    }

    /// Refreshes the registry, then returns a snapshot of it.
    pub async fn available_packages(&self) -> Vec<Package> {
        self.refresh().await;
        self.packages()
    }

    /// Looks up a package by file name, ignoring case.
    pub fn find_package(&self, file_name: &str) -> Option<Package> {
        self.inner.registry.find_by_file_name(file_name)
    }

    /// Refreshes, then reports whether `file_name` is a known package.
    pub fn is_package_available(&self, file_name: &str) -> bool {
        self.refresh_package_list();
        self.find_package(file_name).is_some()
    }

    /// Refreshes, then reports whether `file_name` is installed (including
    /// "installed, restart needed").
    pub fn is_package_installed(&self, file_name: &str) -> bool {
        self.refresh_package_list();
        self.find_package(file_name)
            .is_some_and(|p| p.is_installed())
    }

    /// Adds the ephemeral `Downloading` placeholder for an artifact.
    pub fn on_download_started(&self, file_name: &str) {
        let path = self.inner.download_location.join(file_name);
        debug!("download started: {}", path.display());
        self.inner.registry.upsert(Package::downloading(path));
    }

    /// Removes the `Downloading` placeholder and refreshes so the finished
    /// file is picked up as a regular entry.
    pub async fn on_download_finished(&self, file_name: &str) {
        let path = self.inner.download_location.join(file_name);
        debug!("download finished: {}", path.display());
        self.inner
            .registry
            .remove_with_status(&path, PackageStatus::Downloading);
        self.refresh().await;
    }

    /// Runs a refresh pass on the blocking pool.
    pub async fn refresh(&self) {
        let this = self.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || this.refresh_package_list()).await {
            warn!("package refresh task failed: {e}");
        }
    }

    /// Reconciles the registry with the download directory, the detector,
    /// and embedded archive state.
    ///
    /// Blocking; idempotent when nothing on disk changed.
    pub fn refresh_package_list(&self) {
        let inner = &self.inner;
        let _serialized = inner
            .refresh_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let base = inner.registry.snapshot();

        let files = match list_package_files(&inner.download_location) {
            Ok(files) => files,
            Err(e) => {
                warn!(
                    "cannot list download location {}: {e}",
                    inner.download_location.display()
                );
                return;
            }
        };
        let on_disk: HashSet<String> = files.iter().map(|f| Package::key_for(f)).collect();

        let mut packages: Vec<Package> = base
            .iter()
            .filter(|p| p.status == PackageStatus::Downloading || on_disk.contains(&p.key()))
            .cloned()
            .collect();

        let known: HashSet<String> = packages.iter().map(Package::key).collect();
        for file in &files {
            if !known.contains(&Package::key_for(file)) {
                packages.push(self.discover(file));
            }
        }

        let installed = self.detect_installed();
        let reconciled = packages
            .into_iter()
            .map(|p| self.reconcile(p, &installed))
            .collect();

        inner.registry.commit(&base, reconciled);
    }

    /// Installs the package named `file_name`.
    ///
    /// Publishes `Installing`, runs the format's installer, publishes the
    /// final status, fires the completion hook, and refreshes.  Installs are
    /// serialized: a second call waits for the first to finish.
    ///
    /// # Errors
    ///
    /// [`SetupError::Cancelled`] if `cancel` fired while waiting for an
    /// earlier install, [`SetupError::PackageNotAvailable`] if no such
    /// package exists (or it is still downloading),
    /// [`SetupError::UnsupportedFormat`] if no installer handles it.  None of
    /// these touches the registry.  An installer
    /// failure is *not* an error: it is reported through the returned
    /// package's status and error code.
    pub async fn install_package(
        &self,
        file_name: &str,
        cancel: CancellationToken,
    ) -> Result<Package, SetupError> {
        let _serialized = self.inner.install_lock.lock().await;
        if cancel.is_cancelled() {
            info!("installation of {file_name} cancelled before it started");
            return Err(SetupError::Cancelled(file_name.to_string()));
        }

        let package = self
            .find_package(file_name)
            .filter(|p| p.status != PackageStatus::Downloading)
            .ok_or_else(|| SetupError::PackageNotAvailable(file_name.to_string()))?;
        let installer = self
            .installer_for(package.format())
            .ok_or_else(|| SetupError::UnsupportedFormat(file_name.to_string()))?;

        let installing = package.installing();
        self.inner.registry.replace(installing.clone());
        info!("installing {}", installing.file_name());

        let result = installer.install(&installing, cancel).await;

        let finished = installing.with_install_result(result);
        self.inner.registry.replace(finished.clone());
        info!(
            "{} installation finished with result: {:?} ({result})",
            finished.file_name(),
            finished.status
        );
        if let Some(hook) = &self.inner.on_setup_finished {
            hook(&finished, result);
        }

        self.refresh().await;
        Ok(finished)
    }

    /// Installs several packages one after another.
    ///
    /// Names that are unknown or have no installer are skipped with a
    /// warning.
    pub async fn install_packages(&self, file_names: &[String], cancel: CancellationToken) -> Vec<Package> {
        let mut finished = Vec::new();
        for name in file_names {
            if cancel.is_cancelled() {
                break;
            }
            match self.install_package(name, cancel.clone()).await {
                Ok(package) => finished.push(package),
                Err(e) => warn!("skipping {name}: {e}"),
            }
        }
        finished
    }

    fn installer_for(&self, format: PackageFormat) -> Option<Arc<dyn PackageInstaller>> {
        match format {
            PackageFormat::NativeInstaller => Some(Arc::clone(&self.inner.deps.native_installer)),
            PackageFormat::PackageManager => {
                Some(Arc::clone(&self.inner.deps.package_manager_installer))
            }
            PackageFormat::Unknown => None,
        }
    }

    /// Creates the entry for a newly discovered file.
    fn discover(&self, file: &Path) -> Package {
        let mut package = Package::new(file, PackageStatus::Downloaded);
        match self.inner.deps.inspector.metadata(file) {
            Ok(meta) => {
                package.product_code = meta.product_code;
                package.product_name = meta.product_name;
            }
            Err(e) => warn!("no metadata for {}: {e}", file.display()),
        }
        package
    }

    /// Product records keyed by lowercased product code.
    fn detect_installed(&self) -> HashMap<String, InstalledProduct> {
        match self.inner.deps.detector.installed_products() {
            Ok(products) => products
                .into_iter()
                .map(|p| (p.product_code.to_lowercase(), p))
                .collect(),
            Err(e) => {
                warn!("installation detector failed, treating all packages as not installed: {e}");
                HashMap::new()
            }
        }
    }

    fn reconcile(&self, package: Package, installed: &HashMap<String, InstalledProduct>) -> Package {
        let embedded = (package.format() == PackageFormat::PackageManager
            && package.status != PackageStatus::Downloading)
            .then(|| self.embedded_state(&package.file_path))
            .flatten();

        // Without a marker, a package-manager record only counts when it is
        // this archive's version.
        let record = package
            .product_code
            .as_deref()
            .and_then(|code| installed.get(&code.to_lowercase()))
            .filter(|product| {
                package.format() != PackageFormat::PackageManager
                    || embedded.as_ref().is_some_and(|state| {
                        state.install_date.is_some() || version_matches(product, state)
                    })
            });

        let mut package = match record {
            Some(product) => {
                let mut updated = package.with_installed_product(product);
                if !updated.status.is_transient() {
                    updated.status = PackageStatus::Installed;
                }
                updated
            }
            None => {
                let mut updated = package.without_display_metadata();
                if !updated.status.is_transient() {
                    updated.status = PackageStatus::Downloaded;
                }
                updated
            }
        };

        if let Some(state) = embedded {
            apply_embedded_state(&mut package, state);
        }
        package
    }

    fn embedded_state(&self, path: &Path) -> Option<EmbeddedInstallState> {
        match self.inner.deps.inspector.embedded_state(path) {
            Ok(state) => Some(state),
            Err(e) => {
                // The file may have vanished mid-scan.
                debug!("no embedded state for {}: {e}", path.display());
                None
            }
        }
    }
}

fn apply_embedded_state(package: &mut Package, state: EmbeddedInstallState) {
    if let Some(install_date) = state.install_date {
        if package.status != PackageStatus::Installing {
            package.status = PackageStatus::Installed;
        }
        package.install_date = Some(install_date);
    }
    if let Some(manifest) = state.manifest {
        package.display_name = non_empty(&manifest.title);
        package.product_name = non_empty(&manifest.title);
        package.display_version = non_empty(&manifest.version);
        package.publisher = non_empty(&manifest.authors);
    }
}

/// Whether the detector reports the archive's own manifest version.
fn version_matches(product: &InstalledProduct, state: &EmbeddedInstallState) -> bool {
    match (product.display_version.as_deref(), state.manifest.as_ref()) {
        (Some(installed), Some(manifest)) => installed.trim().eq_ignore_ascii_case(manifest.version.trim()),
        _ => false,
    }
}

#[async_trait]
impl DeploymentTarget for SetupManager {
    fn download_location(&self) -> PathBuf {
        self.inner.download_location.clone()
    }

    fn on_download_started(&self, file_name: &str) {
        SetupManager::on_download_started(self, file_name);
    }

    async fn on_download_finished(&self, file_name: &str) {
        SetupManager::on_download_finished(self, file_name).await;
    }

    async fn install_package(
        &self,
        file_name: &str,
        cancel: CancellationToken,
    ) -> Result<Package, SetupError> {
        SetupManager::install_package(self, file_name, cancel).await
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Lists regular files in `dir`, skipping hidden names and entries that
/// vanish while the listing is in progress.
fn list_package_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if entry.file_type().is_ok_and(|t| t.is_file()) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
