//! Core domain model for piece metadata extraction.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "pieces-core";

/// Placeholder for any field the model could not determine.
pub const NOT_AVAILABLE: &str = "N/A";

/// Output keys of the extraction schema, in prompt order.
pub const SCHEMA_KEYS: [&str; 5] = ["Composer", "Title", "Catalog Number", "Key", "Form"];

/// One extracted record: the five schema fields plus the query and raw model answer.
///
/// `error` is only serialized on the parse-failure path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    #[serde(rename = "Composer")]
    pub composer: String,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Catalog Number")]
    pub catalog_number: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Form")]
    pub form: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
    pub query: String,
    pub answer: String,
}

impl ExtractionRecord {
    /// Record returned when the model reply holds no usable JSON object.
    pub fn placeholder(query: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            composer: NOT_AVAILABLE.to_string(),
            title: NOT_AVAILABLE.to_string(),
            catalog_number: NOT_AVAILABLE.to_string(),
            key: NOT_AVAILABLE.to_string(),
            form: NOT_AVAILABLE.to_string(),
            error: Some(true),
            query: query.into(),
            answer: answer.into(),
        }
    }

    pub fn is_parse_failure(&self) -> bool {
        self.error.unwrap_or(false)
    }

    /// Schema field by its output key. Unknown keys yield `None`.
    pub fn field(&self, schema_key: &str) -> Option<&str> {
        match schema_key {
            "Composer" => Some(&self.composer),
            "Title" => Some(&self.title),
            "Catalog Number" => Some(&self.catalog_number),
            "Key" => Some(&self.key),
            "Form" => Some(&self.form),
            _ => None,
        }
    }
}

/// Insertion-ordered mapping from a dataset-native key to its record.
pub type ResultMapping = IndexMap<String, ExtractionRecord>;

/// Per-item handoff from a dataset adapter into the batch driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetItem {
    pub key: String,
    pub query: String,
    /// Composer known from side metadata; replaces whatever the model extracted.
    pub known_composer: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Fs,
    Pstreet,
    Cipi,
    Audio,
}

impl DatasetKind {
    /// Fixed run order used when no registry overrides it.
    pub const RUN_ORDER: [DatasetKind; 4] = [
        DatasetKind::Fs,
        DatasetKind::Pstreet,
        DatasetKind::Cipi,
        DatasetKind::Audio,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DatasetKind::Fs => "fs",
            DatasetKind::Pstreet => "pstreet",
            DatasetKind::Cipi => "cipi",
            DatasetKind::Audio => "audio",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown dataset `{0}` (expected one of: fs, pstreet, cipi, audio)")]
pub struct DatasetKindParseError(pub String);

impl FromStr for DatasetKind {
    type Err = DatasetKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fs" => Ok(DatasetKind::Fs),
            "pstreet" => Ok(DatasetKind::Pstreet),
            "cipi" => Ok(DatasetKind::Cipi),
            "audio" => Ok(DatasetKind::Audio),
            _ => Err(DatasetKindParseError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_serializes_error_marker_and_sentinels() {
        let record = ExtractionRecord::placeholder("garbled", "I cannot determine this.");
        let value = serde_json::to_value(&record).unwrap();
        for key in SCHEMA_KEYS {
            assert_eq!(value[key], NOT_AVAILABLE, "{key}");
        }
        assert_eq!(value["error"], true);
        assert_eq!(value["query"], "garbled");
        assert_eq!(value["answer"], "I cannot determine this.");
        assert!(record.is_parse_failure());
    }

    #[test]
    fn successful_record_omits_error_key() {
        let mut record = ExtractionRecord::placeholder("q", "a");
        record.error = None;
        record.composer = "F. Chopin".into();
        let text = serde_json::to_string(&record).unwrap();
        assert!(!text.contains("\"error\""));
        assert!(text.starts_with("{\"Composer\":\"F. Chopin\""));
        assert!(!record.is_parse_failure());
    }

    #[test]
    fn field_lookup_follows_schema_keys() {
        let record = ExtractionRecord::placeholder("q", "a");
        for key in SCHEMA_KEYS {
            assert_eq!(record.field(key), Some(NOT_AVAILABLE));
        }
        assert_eq!(record.field("query"), None);
    }

    #[test]
    fn dataset_kind_parses_case_insensitively() {
        assert_eq!("PStreet".parse::<DatasetKind>().unwrap(), DatasetKind::Pstreet);
        assert_eq!(" audio ".parse::<DatasetKind>().unwrap(), DatasetKind::Audio);
        assert!("imslp".parse::<DatasetKind>().is_err());
        for kind in DatasetKind::RUN_ORDER {
            assert_eq!(kind.as_str().parse::<DatasetKind>().unwrap(), kind);
        }
    }
}
