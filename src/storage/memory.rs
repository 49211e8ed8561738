//! In-memory sink for tests and dry runs.

use std::collections::HashMap;
use std::sync::RwLock;

use super::Sink;
use crate::error::{IngestError, Result};

#[derive(Default)]
pub struct MemorySink {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    metadata: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .ok()
            .and_then(|m| m.get(path).cloned())
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .objects
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    pub fn metadata_for(&self, filing_id: &str) -> Option<serde_json::Value> {
        self.metadata
            .read()
            .ok()
            .and_then(|m| m.get(filing_id).cloned())
    }
}

#[async_trait::async_trait]
impl Sink for MemorySink {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| IngestError::Serialize("sink lock poisoned".to_string()))?
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self
            .objects
            .read()
            .map_err(|_| IngestError::Serialize("sink lock poisoned".to_string()))?
            .contains_key(path))
    }

    async fn record_metadata(&self, filing_id: &str, attrs: serde_json::Value) -> Result<()> {
        let mut metadata = self
            .metadata
            .write()
            .map_err(|_| IngestError::Serialize("sink lock poisoned".to_string()))?;
        let entry = metadata
            .entry(filing_id.to_string())
            .or_insert(serde_json::json!({}));
        if let (Some(target), Some(source)) = (entry.as_object_mut(), attrs.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        } else {
            *entry = attrs;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_exists_and_readback() {
        let sink = MemorySink::new();
        sink.put("companies/AAPL/10-K/2023/annual/text.txt", b"hello")
            .await
            .unwrap();
        assert!(sink
            .exists("companies/AAPL/10-K/2023/annual/text.txt")
            .await
            .unwrap());
        assert_eq!(
            sink.object("companies/AAPL/10-K/2023/annual/text.txt"),
            Some(b"hello".to_vec())
        );
    }
}
