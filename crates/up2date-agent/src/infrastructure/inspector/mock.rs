//! Mock package inspector keyed by file name.
//!
//! Files the test has not described get empty metadata and no embedded
//! state, like an `Unknown`-format file would.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::application::setup_manager::{
    EmbeddedInstallState, InspectionError, PackageInspector, PackageMetadata,
};

#[derive(Default)]
pub struct MockInspector {
    metadata: Mutex<HashMap<String, PackageMetadata>>,
    embedded: Mutex<HashMap<String, EmbeddedInstallState>>,
}

fn file_key(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

impl MockInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_metadata(&self, file_name: &str, product_code: &str, product_name: &str) {
        self.metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                file_name.to_lowercase(),
                PackageMetadata {
                    product_code: Some(product_code.to_string()),
                    product_name: Some(product_name.to_string()),
                },
            );
    }

    pub fn set_embedded(&self, file_name: &str, state: EmbeddedInstallState) {
        self.embedded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file_name.to_lowercase(), state);
    }
}

impl PackageInspector for MockInspector {
    fn metadata(&self, path: &Path) -> Result<PackageMetadata, InspectionError> {
        Ok(self
            .metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&file_key(path))
            .cloned()
            .unwrap_or_default())
    }

    fn embedded_state(&self, path: &Path) -> Result<EmbeddedInstallState, InspectionError> {
        Ok(self
            .embedded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&file_key(path))
            .cloned()
            .unwrap_or_default())
    }
}
