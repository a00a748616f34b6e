//! Recording installers for tests.
//!
//! `MockInstaller` stands in for either executor and returns a configurable
//! result code; `MockScriptHost` stands in for PowerShell inside the real
//! `NupkgInstaller`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use up2date_core::Package;

use super::nupkg::ScriptHost;
use crate::application::setup_manager::PackageInstaller;

type SideEffect = Arc<dyn Fn(&Package) + Send + Sync>;

/// Installer that records each package it is asked to install.
#[derive(Default)]
pub struct MockInstaller {
    /// Packages passed to `install`, in call order.
    pub installed: Mutex<Vec<Package>>,
    result: AtomicI32,
    side_effect: Mutex<Option<SideEffect>>,
}

impl MockInstaller {
    /// An installer whose every run returns `result`.
    pub fn returning(result: i32) -> Self {
        Self {
            result: AtomicI32::new(result),
            ..Self::default()
        }
    }

    pub fn set_result(&self, result: i32) {
        self.result.store(result, Ordering::SeqCst);
    }

    /// Runs `effect` during every install, before the result is returned.
    /// Use it to simulate what the real installer changes on the host.
    pub fn set_side_effect(&self, effect: impl Fn(&Package) + Send + Sync + 'static) {
        *self
            .side_effect
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(effect));
    }

    /// File paths of every install call.
    pub fn installed_paths(&self) -> Vec<PathBuf> {
        self.installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|p| p.file_path.clone())
            .collect()
    }
}

#[async_trait]
impl PackageInstaller for MockInstaller {
    async fn install(&self, package: &Package, _cancel: CancellationToken) -> i32 {
        self.installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(package.clone());
        let effect = self
            .side_effect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(effect) = effect {
            effect(package);
        }
        self.result.load(Ordering::SeqCst)
    }
}

/// Script host that records the script it would have run.
#[derive(Default)]
pub struct MockScriptHost {
    /// `(package_dir, script contents)` per run.
    pub runs: Mutex<Vec<(PathBuf, String)>>,
    pub exit_code: i32,
}

impl MockScriptHost {
    pub fn returning(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }
}

impl ScriptHost for MockScriptHost {
    fn run_script(&self, package_dir: &Path, script: &Path) -> io::Result<i32> {
        let contents = std::fs::read_to_string(script)?;
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((package_dir.to_path_buf(), contents));
        Ok(self.exit_code)
    }
}
