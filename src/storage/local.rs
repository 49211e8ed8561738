//! Filesystem sink with write-then-rename commits.

use log::debug;
use rand::Rng;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::Sink;
use crate::error::{IngestError, Result};

/// Writes artifacts under a root directory. Every `put` goes to a
/// `.tmp-<nonce>` sibling first and is renamed into place on success, so a
/// cancelled or failed write never leaves a half-written artifact behind.
pub struct LocalSink {
    root: PathBuf,
}

impl LocalSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalSink { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait::async_trait]
impl Sink for LocalSink {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let nonce: u32 = rand::thread_rng().gen();
        let temp = temp_path(&target, nonce);

        if let Err(err) = fs::write(&temp, bytes).await {
            let _ = fs::remove_file(&temp).await;
            return Err(IngestError::Serialize(format!(
                "failed writing {}: {}",
                temp.display(),
                err
            )));
        }
        if let Err(err) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(IngestError::Serialize(format!(
                "failed committing {}: {}",
                target.display(),
                err
            )));
        }
        debug!("wrote {}", target.display());
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(fs::try_exists(self.resolve(path)).await?)
    }

    async fn record_metadata(&self, filing_id: &str, attrs: serde_json::Value) -> Result<()> {
        let path = self
            .root
            .join("metadata")
            .join(format!("{}.json", filing_id));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Upsert: merge into whatever was recorded before.
        let mut merged = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or(serde_json::json!({})),
            Err(_) => serde_json::json!({}),
        };
        if let (Some(target), Some(source)) = (merged.as_object_mut(), attrs.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        } else {
            merged = attrs;
        }

        let bytes = serde_json::to_vec_pretty(&merged)
            .map_err(|e| IngestError::Serialize(e.to_string()))?;

        let nonce: u32 = rand::thread_rng().gen();
        let temp = temp_path(&path, nonce);
        fs::write(&temp, &bytes).await?;
        fs::rename(&temp, &path).await?;
        Ok(())
    }
}

fn temp_path(target: &Path, nonce: u32) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    target.with_file_name(format!("{}.tmp-{:08x}", name, nonce))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_exists() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalSink::new(dir.path());

        assert!(!sink.exists("companies/MSFT/10-Q/2024/Q1/llm.txt").await.unwrap());
        sink.put("companies/MSFT/10-Q/2024/Q1/llm.txt", b"@DOCUMENT: x")
            .await
            .unwrap();
        assert!(sink.exists("companies/MSFT/10-Q/2024/Q1/llm.txt").await.unwrap());

        let content =
            std::fs::read_to_string(dir.path().join("companies/MSFT/10-Q/2024/Q1/llm.txt"))
                .unwrap();
        assert_eq!(content, "@DOCUMENT: x");
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalSink::new(dir.path());
        sink.put("a/b.txt", b"data").await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path().join("a"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["b.txt"]);
    }

    #[tokio::test]
    async fn test_metadata_upsert_merges_keys() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalSink::new(dir.path());

        sink.record_metadata("MSFT-10-Q-2024-Q1", serde_json::json!({"cik": "0000789019"}))
            .await
            .unwrap();
        sink.record_metadata("MSFT-10-Q-2024-Q1", serde_json::json!({"filing_date": "2023-10-24"}))
            .await
            .unwrap();

        let bytes = std::fs::read(dir.path().join("metadata/MSFT-10-Q-2024-Q1.json")).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["cik"], "0000789019");
        assert_eq!(value["filing_date"], "2023-10-24");
    }
}
