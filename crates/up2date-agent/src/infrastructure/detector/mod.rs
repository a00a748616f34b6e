//! Installation detectors.
//!
//! Two backends answer "is this product installed?":
//!
//! - **`windows`** – the OS uninstall registry (Windows only).
//! - **`choco`** – the Chocolatey package manager's local package list.
//!
//! [`ChainDetector`] queries them in priority order and merges their
//! answers, the first record for a product code winning.

pub mod choco;
pub mod mock;

#[cfg(target_os = "windows")]
pub mod windows;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;
use up2date_core::InstalledProduct;

use crate::application::setup_manager::{DetectionError, InstallationDetector};

/// Queries several detectors in priority order.
pub struct ChainDetector {
    detectors: Vec<Arc<dyn InstallationDetector>>,
}

impl ChainDetector {
    pub fn new(detectors: Vec<Arc<dyn InstallationDetector>>) -> Self {
        Self { detectors }
    }

    /// The platform's detectors: the uninstall registry first (Windows
    /// only), then Chocolatey.
    pub fn for_platform(choco_program: impl Into<String>) -> Self {
        let mut detectors: Vec<Arc<dyn InstallationDetector>> = Vec::new();
        #[cfg(target_os = "windows")]
        detectors.push(Arc::new(windows::RegistryDetector::new()));
        detectors.push(Arc::new(choco::ChocoDetector::new(choco_program)));
        Self::new(detectors)
    }
}

impl InstallationDetector for ChainDetector {
    /// Never fails: a failing backend is logged and skipped.
    fn installed_products(&self) -> Result<Vec<InstalledProduct>, DetectionError> {
        let mut seen = HashSet::new();
        let mut products = Vec::new();
        for detector in &self.detectors {
            match detector.installed_products() {
                Ok(found) => {
                    for product in found {
                        if seen.insert(product.product_code.to_lowercase()) {
                            products.push(product);
                        }
                    }
                }
                Err(e) => warn!("installation detector skipped: {e}"),
            }
        }
        Ok(products)
    }
}
