//! Whole-file JSON checkpoints written through an atomic temp-file rename.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "pieces-storage";

const INDENT: &[u8] = b"    ";

#[derive(Debug, Clone)]
pub struct CheckpointWrite {
    pub path: PathBuf,
    pub byte_size: usize,
}

/// A single output file that is rewritten in full on every checkpoint.
#[derive(Debug, Clone)]
pub struct JsonCheckpoint {
    path: PathBuf,
}

impl JsonCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file with `value`. Readers see either the previous or the new
    /// contents, never a truncated file.
    pub async fn write<T: Serialize + ?Sized>(&self, value: &T) -> anyhow::Result<CheckpointWrite> {
        let bytes = to_indented_json(value)
            .with_context(|| format!("serializing checkpoint {}", self.path.display()))?;

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating checkpoint directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp checkpoint file {}", temp_path.display()))?;
        if let Err(err) = write_all_synced(&mut file, &bytes).await {
            drop(file);
            let _ = fs::remove_file(&temp_path).await;
            return Err(err)
                .with_context(|| format!("writing temp checkpoint file {}", temp_path.display()));
        }
        drop(file);

        match fs::rename(&temp_path, &self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), bytes = bytes.len(), "checkpoint written");
                Ok(CheckpointWrite {
                    path: self.path.clone(),
                    byte_size: bytes.len(),
                })
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "atomically renaming temp checkpoint {} -> {}",
                        temp_path.display(),
                        self.path.display()
                    )
                })
            }
        }
    }
}

async fn write_all_synced(file: &mut fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Pretty JSON with four-space indentation.
pub fn to_indented_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = PrettyFormatter::with_indent(INDENT);
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut ser)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use tempfile::tempdir;

    #[test]
    fn indented_json_uses_four_spaces() {
        let mut map = IndexMap::new();
        map.insert("b", 1);
        map.insert("a", 2);
        let text = String::from_utf8(to_indented_json(&map).unwrap()).unwrap();
        assert_eq!(text, "{\n    \"b\": 1,\n    \"a\": 2\n}");
    }

    #[tokio::test]
    async fn checkpoint_overwrites_and_leaves_no_temp_files() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("parsed").join("fs_parsed.json");
        let checkpoint = JsonCheckpoint::new(&target);

        let mut map: IndexMap<String, String> = IndexMap::new();
        map.insert("1".into(), "first".into());
        checkpoint.write(&map).await.expect("first write");
        map.insert("2".into(), "second".into());
        let written = checkpoint.write(&map).await.expect("second write");

        assert_eq!(written.path, target);
        let text = std::fs::read_to_string(&target).unwrap();
        assert_eq!(written.byte_size, text.len());
        let reloaded: IndexMap<String, String> = serde_json::from_str(&text).unwrap();
        assert_eq!(reloaded, map);
        assert_eq!(reloaded.keys().collect::<Vec<_>>(), vec!["1", "2"]);

        let leftovers = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn checkpoint_into_missing_parent_creates_it() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("a").join("b").join("out.json");
        JsonCheckpoint::new(&target)
            .write(&serde_json::json!({"k": "v"}))
            .await
            .expect("write");
        assert!(target.exists());
    }
}
