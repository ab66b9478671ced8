//! Dataset adapter contracts + the four piano index adapters.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use pieces_core::{DatasetItem, DatasetKind};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "pieces-adapters";

pub const FREESCORES_INDEX_FILE: &str = "index_freescores_difficulty.json";
pub const PIANOSTREET_INDEX_FILE: &str = "index_pianostreet_onlypiano_difficulty.json";
pub const CIPI_INDEX_FILE: &str = "index_CIPI.json";
pub const AUDIO_SPLIT_FILE: &str = "split_audio.json";
pub const AUDIO_COMPOSERS_MEN_FILE: &str = "metadata_men_extended2.json";
pub const AUDIO_COMPOSERS_WOMEN_FILE: &str = "metadata_women_extended2.json";

const AUDIO_SPLIT_FOLD: &str = "0";
const AUDIO_SPLIT_PARTS: [&str; 3] = ["train", "test", "val"];

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("entry `{key}` has no string field `{field}`")]
    MissingField { key: String, field: &'static str },
    #[error("no composer metadata for audio entry `{key}`")]
    UnknownComposer { key: String },
    #[error("{0}")]
    Message(String),
}

/// One raw index entry: the dataset-native key and its metadata object.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub key: String,
    pub metadata: JsonValue,
}

impl IndexEntry {
    pub fn new(key: impl Into<String>, metadata: JsonValue) -> Self {
        Self {
            key: key.into(),
            metadata,
        }
    }

    fn required_str(&self, field: &'static str) -> Result<&str, AdapterError> {
        json_str(&self.metadata, &[field]).ok_or_else(|| AdapterError::MissingField {
            key: self.key.clone(),
            field,
        })
    }

    fn optional_str(&self, field: &str) -> Option<&str> {
        json_str(&self.metadata, &[field])
    }
}

/// Loads one dataset's index and turns each entry into an extraction query.
///
/// Loading reads every file up front; `build_item` runs lazily per entry so a bad
/// entry only fails once the driver reaches it.
pub trait DatasetAdapter: Send + Sync {
    fn kind(&self) -> DatasetKind;
    fn default_output_file(&self) -> &'static str;
    fn load_entries(&self) -> Result<Vec<IndexEntry>, AdapterError>;
    fn build_item(&self, entry: &IndexEntry) -> Result<DatasetItem, AdapterError>;
}

pub fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, AdapterError> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).map_err(|source| AdapterError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| AdapterError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    cur.as_str()
}

fn load_keyed_index(path: &Path) -> Result<Vec<IndexEntry>, AdapterError> {
    let index: IndexMap<String, JsonValue> = read_json_file(path)?;
    debug!(path = %path.display(), entries = index.len(), "loaded dataset index");
    Ok(index
        .into_iter()
        .map(|(key, metadata)| IndexEntry { key, metadata })
        .collect())
}

/// freescores difficulty index: the piece text is the whole query.
#[derive(Debug, Clone)]
pub struct FreescoresAdapter {
    index_path: PathBuf,
}

impl DatasetAdapter for FreescoresAdapter {
    fn kind(&self) -> DatasetKind {
        DatasetKind::Fs
    }

    fn default_output_file(&self) -> &'static str {
        "fs_parsed.json"
    }

    fn load_entries(&self) -> Result<Vec<IndexEntry>, AdapterError> {
        load_keyed_index(&self.index_path)
    }

    fn build_item(&self, entry: &IndexEntry) -> Result<DatasetItem, AdapterError> {
        Ok(DatasetItem {
            key: entry.key.clone(),
            query: entry.required_str("piece_text")?.to_string(),
            known_composer: None,
        })
    }
}

/// Piano Street piano-only difficulty index.
#[derive(Debug, Clone)]
pub struct PianoStreetAdapter {
    index_path: PathBuf,
}

impl DatasetAdapter for PianoStreetAdapter {
    fn kind(&self) -> DatasetKind {
        DatasetKind::Pstreet
    }

    fn default_output_file(&self) -> &'static str {
        "pstreet_parsed.json"
    }

    fn load_entries(&self) -> Result<Vec<IndexEntry>, AdapterError> {
        load_keyed_index(&self.index_path)
    }

    fn build_item(&self, entry: &IndexEntry) -> Result<DatasetItem, AdapterError> {
        let query = format!(
            "{} {} {}",
            entry.required_str("composer")?,
            entry.required_str("work")?,
            entry.required_str("key")?
        );
        Ok(DatasetItem {
            key: entry.key.clone(),
            query,
            known_composer: None,
        })
    }
}

/// CIPI index. `book` is optional and leaves an empty slot when absent.
#[derive(Debug, Clone)]
pub struct CipiAdapter {
    index_path: PathBuf,
}

impl DatasetAdapter for CipiAdapter {
    fn kind(&self) -> DatasetKind {
        DatasetKind::Cipi
    }

    fn default_output_file(&self) -> &'static str {
        "cipi_parsed.json"
    }

    fn load_entries(&self) -> Result<Vec<IndexEntry>, AdapterError> {
        load_keyed_index(&self.index_path)
    }

    fn build_item(&self, entry: &IndexEntry) -> Result<DatasetItem, AdapterError> {
        let query = format!(
            "{} {} {}",
            entry.required_str("composer")?,
            entry.optional_str("book").unwrap_or_default(),
            entry.required_str("work_name")?
        );
        Ok(DatasetItem {
            key: entry.key.clone(),
            query,
            known_composer: None,
        })
    }
}

/// Audio split index. Keys are composite metadata strings that begin with the
/// composer name; the composer comes from side metadata and is hidden from the model.
#[derive(Debug, Clone)]
pub struct AudioAdapter {
    split_path: PathBuf,
    composer_paths: Vec<PathBuf>,
}

type AudioSplit = IndexMap<String, IndexMap<String, IndexMap<String, JsonValue>>>;

impl AudioAdapter {
    fn load_composer_lookup(&self) -> Result<IndexMap<String, JsonValue>, AdapterError> {
        let mut lookup = IndexMap::new();
        // Later files win on key collisions.
        for path in &self.composer_paths {
            let part: IndexMap<String, JsonValue> = read_json_file(path)?;
            lookup.extend(part);
        }
        Ok(lookup)
    }
}

impl DatasetAdapter for AudioAdapter {
    fn kind(&self) -> DatasetKind {
        DatasetKind::Audio
    }

    fn default_output_file(&self) -> &'static str {
        "audio_parsed.json"
    }

    fn load_entries(&self) -> Result<Vec<IndexEntry>, AdapterError> {
        let mut split: AudioSplit = read_json_file(&self.split_path)?;
        let mut fold = split.swap_remove(AUDIO_SPLIT_FOLD).ok_or_else(|| {
            AdapterError::Message(format!(
                "{} has no fold `{AUDIO_SPLIT_FOLD}`",
                self.split_path.display()
            ))
        })?;
        let lookup = self.load_composer_lookup()?;

        let mut entries = Vec::new();
        for part in AUDIO_SPLIT_PARTS {
            let keys = fold.swap_remove(part).ok_or_else(|| {
                AdapterError::Message(format!(
                    "{} fold `{AUDIO_SPLIT_FOLD}` has no `{part}` split",
                    self.split_path.display()
                ))
            })?;
            entries.extend(keys.into_keys().map(|key| {
                let metadata = lookup.get(&key).cloned().unwrap_or(JsonValue::Null);
                IndexEntry { key, metadata }
            }));
        }
        debug!(entries = entries.len(), composers = lookup.len(), "loaded audio split");
        Ok(entries)
    }

    fn build_item(&self, entry: &IndexEntry) -> Result<DatasetItem, AdapterError> {
        if entry.metadata.is_null() {
            return Err(AdapterError::UnknownComposer {
                key: entry.key.clone(),
            });
        }
        let composer = entry.required_str("composer")?;
        Ok(DatasetItem {
            key: entry.key.clone(),
            query: strip_composer_prefix(&entry.key, composer).to_string(),
            known_composer: Some(composer.to_string()),
        })
    }
}

/// Drop the leading composer name from a composite metadata string. When the
/// string does not literally start with the name, the same number of characters
/// is skipped instead.
pub fn strip_composer_prefix<'a>(metadata: &'a str, composer: &str) -> &'a str {
    let rest = match metadata.strip_prefix(composer) {
        Some(rest) => rest,
        None => match metadata.char_indices().nth(composer.chars().count()) {
            Some((idx, _)) => &metadata[idx..],
            None => "",
        },
    };
    rest.trim_start()
}

pub fn freescores_adapter(input_dir: &Path) -> FreescoresAdapter {
    FreescoresAdapter {
        index_path: input_dir.join(FREESCORES_INDEX_FILE),
    }
}

pub fn pianostreet_adapter(input_dir: &Path) -> PianoStreetAdapter {
    PianoStreetAdapter {
        index_path: input_dir.join(PIANOSTREET_INDEX_FILE),
    }
}

pub fn cipi_adapter(input_dir: &Path) -> CipiAdapter {
    CipiAdapter {
        index_path: input_dir.join(CIPI_INDEX_FILE),
    }
}

pub fn audio_adapter(input_dir: &Path) -> AudioAdapter {
    AudioAdapter {
        split_path: input_dir.join(AUDIO_SPLIT_FILE),
        composer_paths: vec![
            input_dir.join(AUDIO_COMPOSERS_MEN_FILE),
            input_dir.join(AUDIO_COMPOSERS_WOMEN_FILE),
        ],
    }
}

pub fn adapter_for_dataset(kind: DatasetKind, input_dir: &Path) -> Box<dyn DatasetAdapter> {
    match kind {
        DatasetKind::Fs => Box::new(freescores_adapter(input_dir)),
        DatasetKind::Pstreet => Box::new(pianostreet_adapter(input_dir)),
        DatasetKind::Cipi => Box::new(cipi_adapter(input_dir)),
        DatasetKind::Audio => Box::new(audio_adapter(input_dir)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixtures_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("fixtures")
            .join("original")
            .canonicalize()
            .expect("fixtures dir")
    }

    fn items_for(kind: DatasetKind) -> Vec<DatasetItem> {
        let adapter = adapter_for_dataset(kind, &fixtures_dir());
        assert_eq!(adapter.kind(), kind);
        adapter
            .load_entries()
            .unwrap()
            .iter()
            .map(|entry| adapter.build_item(entry).unwrap())
            .collect()
    }

    #[test]
    fn freescores_uses_piece_text_in_file_order() {
        let items = items_for(DatasetKind::Fs);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key, "fs-101");
        assert_eq!(items[0].query, "Chopin - Nocturne Op.9 No.2 in E flat major");
        assert_eq!(items[1].key, "fs-007");
        assert!(items.iter().all(|i| i.known_composer.is_none()));
    }

    #[test]
    fn pianostreet_joins_composer_work_and_key() {
        let items = items_for(DatasetKind::Pstreet);
        assert_eq!(items[0].key, "ps-2");
        assert_eq!(items[0].query, "Frédéric Chopin Etude Op. 25 No. 1 A-flat major");
        assert_eq!(items[1].query, "Erik Satie Gymnopédie No. 1 D major");
    }

    #[test]
    fn cipi_leaves_empty_slot_without_book() {
        let items = items_for(DatasetKind::Cipi);
        assert_eq!(
            items[0].query,
            "Bach, Johann Sebastian Das Wohltemperierte Klavier I Prelude in C major BWV 846"
        );
        assert_eq!(items[1].key, "c-02");
        assert_eq!(items[1].query, "Schumann, Robert  Träumerei Op. 15 No. 7");
    }

    #[test]
    fn audio_walks_train_test_val_and_hides_composer() {
        let items = items_for(DatasetKind::Audio);
        let keys: Vec<_> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "Frédéric Chopin Nocturne Op. 9 No. 2",
                "Clara Schumann Romance Op. 11 No. 1",
                "Claude Debussy Clair de lune",
                "Erik Satie Gymnopédie No. 1",
            ]
        );
        assert_eq!(items[0].query, "Nocturne Op. 9 No. 2");
        assert_eq!(items[0].known_composer.as_deref(), Some("Frédéric Chopin"));
        assert_eq!(items[1].known_composer.as_deref(), Some("Clara Schumann"));
        assert_eq!(items[2].query, "Clair de lune");
    }

    #[test]
    fn missing_required_field_fails_only_that_entry() {
        let adapter = pianostreet_adapter(&fixtures_dir());
        let entry = IndexEntry::new("ps-9", json!({"composer": "F. Liszt", "key": "D-flat major"}));
        let err = adapter.build_item(&entry).unwrap_err();
        assert!(matches!(
            err,
            AdapterError::MissingField { ref key, field: "work" } if key == "ps-9"
        ));
    }

    #[test]
    fn audio_entry_without_lookup_is_unknown_composer() {
        let adapter = audio_adapter(&fixtures_dir());
        let entry = IndexEntry::new("Anonymous Ground", JsonValue::Null);
        assert!(matches!(
            adapter.build_item(&entry),
            Err(AdapterError::UnknownComposer { .. })
        ));
    }

    #[test]
    fn women_lookup_overrides_men_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(AUDIO_SPLIT_FILE),
            r#"{"0": {"train": {"X Piece": 1}, "test": {}, "val": {}}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join(AUDIO_COMPOSERS_MEN_FILE),
            r#"{"X Piece": {"composer": "X"}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join(AUDIO_COMPOSERS_WOMEN_FILE),
            r#"{"X Piece": {"composer": "X Pi"}}"#,
        )
        .unwrap();

        let adapter = audio_adapter(dir.path());
        let entries = adapter.load_entries().unwrap();
        let item = adapter.build_item(&entries[0]).unwrap();
        assert_eq!(item.known_composer.as_deref(), Some("X Pi"));
        assert_eq!(item.query, "ece");
    }

    #[test]
    fn missing_index_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = cipi_adapter(dir.path()).load_entries().unwrap_err();
        assert!(matches!(err, AdapterError::Io { .. }));
    }

    #[test]
    fn strip_prefix_falls_back_to_character_count() {
        assert_eq!(strip_composer_prefix("Erik Satie Gnossienne", "Erik Satie"), "Gnossienne");
        assert_eq!(strip_composer_prefix("Éric Satie Gnossienne", "Eric Satie"), "Gnossienne");
        assert_eq!(strip_composer_prefix("Short", "Much Longer Name"), "");
    }
}
