//! The `.installed` marker written into package-manager archives.

use chrono::{Local, NaiveDateTime};

use super::ManifestError;

/// Timestamp format of the marker entry (`yyyyMMddHHmmss`).
const MARKER_FORMAT: &str = "%Y%m%d%H%M%S";

/// A parsed install marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallMarker {
    installed_at: NaiveDateTime,
}

impl InstallMarker {
    /// A marker stamped with the current local time.
    pub fn now() -> Self {
        Self {
            installed_at: Local::now().naive_local(),
        }
    }

    pub fn at(installed_at: NaiveDateTime) -> Self {
        Self { installed_at }
    }

    pub fn installed_at(&self) -> NaiveDateTime {
        self.installed_at
    }

    /// Parses marker entry contents, tolerating surrounding whitespace and a
    /// trailing line break.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::InvalidMarker`] if the text is not a
    /// `yyyyMMddHHmmss` timestamp.
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let trimmed = text.trim();
        NaiveDateTime::parse_from_str(trimmed, MARKER_FORMAT)
            .map(Self::at)
            .map_err(|_| ManifestError::InvalidMarker(trimmed.to_string()))
    }

    /// The install date string stored on the package.
    pub fn install_date(&self) -> String {
        self.installed_at.format(MARKER_FORMAT).to_string()
    }

    /// Bytes written into the marker entry.
    pub fn to_entry_contents(&self) -> String {
        format!("{}\n", self.install_date())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn fixed() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 7)
            .unwrap()
    }

    #[test]
    fn test_install_date_uses_compact_format() {
        assert_eq!(InstallMarker::at(fixed()).install_date(), "20240309140507");
    }

    #[test]
    fn test_parse_accepts_trailing_crlf() {
        let marker = InstallMarker::parse("20240309140507\r\n").unwrap();
        assert_eq!(marker.installed_at(), fixed());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let result = InstallMarker::parse("yesterday");
        assert!(matches!(result, Err(ManifestError::InvalidMarker(s)) if s == "yesterday"));
    }

    #[test]
    fn test_entry_contents_parse_back() {
        let marker = InstallMarker::at(fixed());
        assert_eq!(InstallMarker::parse(&marker.to_entry_contents()).unwrap(), marker);
    }
}
