//! Nuspec manifest parsing.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};

use super::ManifestError;

/// The identifying fields of a package-manager manifest.
///
/// Missing optional elements are reported as empty strings, matching what
/// the package manager itself shows for them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NuspecManifest {
    /// Package identifier; doubles as the product code.
    pub id: String,
    pub title: String,
    pub version: String,
    /// Comma-separated author list; shown as the publisher.
    pub authors: String,
}

#[derive(Clone, Copy)]
enum Field {
    Id,
    Title,
    Version,
    Authors,
}

impl Field {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"id" => Some(Self::Id),
            b"title" => Some(Self::Title),
            b"version" => Some(Self::Version),
            b"authors" => Some(Self::Authors),
            _ => None,
        }
    }
}

impl NuspecManifest {
    /// Parses a nuspec document.
    ///
    /// Element names are matched without their namespace prefix and only the
    /// first occurrence of each field counts.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Xml`] for malformed XML and
    /// [`ManifestError::MissingId`] when there is no non-blank `<id>`.
    pub fn parse(xml: &str) -> Result<Self, ManifestError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut manifest = Self::default();
        let mut current: Option<Field> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    current = Field::from_local_name(start.local_name().as_ref());
                }
                Event::Text(text) => {
                    if let Some(field) = current {
                        let value = text.unescape()?;
                        manifest.set_if_empty(field, value.trim());
                    }
                }
                Event::End(_) => current = None,
                Event::Eof => break,
                _ => {}
            }
        }

        if manifest.id.is_empty() {
            return Err(ManifestError::MissingId);
        }
        Ok(manifest)
    }

    fn set_if_empty(&mut self, field: Field, value: &str) {
        let slot = match field {
            Field::Id => &mut self.id,
            Field::Title => &mut self.title,
            Field::Version => &mut self.version,
            Field::Authors => &mut self.authors,
        };
        if slot.is_empty() {
            *slot = value.to_string();
        }
    }
}
