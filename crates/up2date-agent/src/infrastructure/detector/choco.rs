//! Chocolatey-backed installation detector.
//!
//! Runs `choco list -li` and reads every `<id> <version>` line of its output.
//! Banner and summary lines do not have that shape and are ignored.  The
//! version goes into `display_version`, where reconciliation compares it with
//! the archive's manifest version.

use std::io::ErrorKind;
use std::process::Command;

use tracing::debug;
use up2date_core::InstalledProduct;

use crate::application::setup_manager::{DetectionError, InstallationDetector};

pub struct ChocoDetector {
    program: String,
}

impl ChocoDetector {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl InstallationDetector for ChocoDetector {
    fn installed_products(&self) -> Result<Vec<InstalledProduct>, DetectionError> {
        let output = Command::new(&self.program)
            .args(["list", "-li"])
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => DetectionError::Unavailable(format!("{} not found", self.program)),
                _ => DetectionError::Io(e),
            })?;

        if !output.status.success() {
            return Err(DetectionError::Query(format!(
                "{} list exited with {}",
                self.program, output.status
            )));
        }

        let products = parse_list_output(&String::from_utf8_lossy(&output.stdout));
        debug!("chocolatey reports {} installed packages", products.len());
        Ok(products)
    }
}

/// Parses `choco list -li` output into product records.
pub fn parse_list_output(output: &str) -> Vec<InstalledProduct> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let (id, version) = (fields.next()?, fields.next()?);
            if fields.next().is_some() || !version.starts_with(|c: char| c.is_ascii_digit()) {
                return None;
            }
            Some(InstalledProduct {
                product_code: id.to_string(),
                display_name: Some(id.to_string()),
                display_version: Some(version.to_string()),
                ..InstalledProduct::default()
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_output_skips_banner_and_summary() {
        // Arrange
        let output = "Chocolatey v1.4.0\r\n\
            7zip 23.1.0\r\n\
            git.install 2.44.0\r\n\
            \r\n\
            2 packages installed.\r\n";

        // Act
        let products = parse_list_output(output);

        // Assert
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].product_code, "7zip");
        assert_eq!(products[1].display_version.as_deref(), Some("2.44.0"));
    }

    #[test]
    fn test_missing_program_is_unavailable() {
        let detector = ChocoDetector::new("up2date-no-such-choco");

        let result = detector.installed_products();

        assert!(matches!(result, Err(DetectionError::Unavailable(_))));
    }
}
