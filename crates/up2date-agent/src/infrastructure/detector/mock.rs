//! Mock installation detector for unit testing.
//!
//! Reports whatever product list the test sets, and counts scans so tests
//! can check that a refresh pass queries the detector once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use up2date_core::InstalledProduct;

use crate::application::setup_manager::{DetectionError, InstallationDetector};

#[derive(Default)]
pub struct MockDetector {
    products: Mutex<Vec<InstalledProduct>>,
    /// Number of `installed_products` calls so far.
    pub scans: AtomicUsize,
    /// When `true`, every scan fails with `DetectionError::Query`.
    pub should_fail: bool,
}

impl MockDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A detector whose every scan fails.
    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    /// Replaces the reported product list.
    pub fn set_installed(&self, products: Vec<InstalledProduct>) {
        *self.products.lock().unwrap_or_else(PoisonError::into_inner) = products;
    }

    /// A record with a product code and display name.
    pub fn product(code: &str, display_name: &str) -> InstalledProduct {
        InstalledProduct {
            product_code: code.to_string(),
            display_name: Some(display_name.to_string()),
            display_version: Some("1.0.0".to_string()),
            ..InstalledProduct::default()
        }
    }
}

impl InstallationDetector for MockDetector {
    fn installed_products(&self) -> Result<Vec<InstalledProduct>, DetectionError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(DetectionError::Query("mock detector failure".to_string()));
        }
        Ok(self
            .products
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}
