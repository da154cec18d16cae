//! Content-addressed artifact storage (spec §4.J): artifacts are scoped
//! under an execution id, keyed uniquely within it, and checksummed with
//! SHA-256 exactly once per write.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use modkit_errors::EngineError;
use sha2::{Digest, Sha256};

/// Metadata recorded alongside a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub execution_id: String,
    pub key: String,
    pub size: u64,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write `data` under `(execution_id, key)`, computing its SHA-256
    /// checksum exactly once during the write.
    ///
    /// # Errors
    /// Propagates the backing store's failure.
    async fn put(&self, execution_id: &str, key: &str, data: Bytes) -> Result<Artifact, EngineError>;

    /// # Errors
    /// `EngineError::ArtifactMissing` if no such artifact exists.
    async fn get(&self, execution_id: &str, key: &str) -> Result<Bytes, EngineError>;

    /// Artifacts under `execution_id`, ordered lexicographically by key.
    ///
    /// # Errors
    /// Propagates the backing store's failure.
    async fn list(&self, execution_id: &str) -> Result<Vec<Artifact>, EngineError>;

    /// # Errors
    /// `EngineError::ArtifactMissing` if no such artifact exists.
    async fn delete(&self, execution_id: &str, key: &str) -> Result<(), EngineError>;
}

/// Checksum an artifact's stored bytes against an externally supplied
/// expected checksum, for callers that received a checksum out-of-band
/// (e.g. a pipeline step's declared output digest).
///
/// # Errors
/// `EngineError::ArtifactMissing` if no such artifact exists,
/// `EngineError::ChecksumMismatch` if the stored digest differs.
pub async fn verify_checksum(
    store: &dyn ArtifactStore,
    execution_id: &str,
    key: &str,
    expected: &str,
) -> Result<(), EngineError> {
    let artifact = store
        .list(execution_id)
        .await?
        .into_iter()
        .find(|a| a.key == key)
        .ok_or_else(|| EngineError::ArtifactMissing { key: key.to_owned() })?;
    if artifact.checksum != expected {
        return Err(EngineError::ChecksumMismatch {
            key: key.to_owned(),
            expected: expected.to_owned(),
            actual: artifact.checksum,
        });
    }
    Ok(())
}

#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// In-memory artifact store, useful standalone and as a reference
/// implementation for the content-addressing contract.
#[derive(Default)]
pub struct InMemoryArtifactStore {
    blobs: DashMap<(String, String), (Artifact, Bytes)>,
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, execution_id: &str, key: &str, data: Bytes) -> Result<Artifact, EngineError> {
        let checksum = sha256_hex(&data);
        let artifact = Artifact {
            execution_id: execution_id.to_owned(),
            key: key.to_owned(),
            size: u64::try_from(data.len()).unwrap_or(u64::MAX),
            checksum,
            created_at: Utc::now(),
        };
        self.blobs.insert((execution_id.to_owned(), key.to_owned()), (artifact.clone(), data));
        Ok(artifact)
    }

    async fn get(&self, execution_id: &str, key: &str) -> Result<Bytes, EngineError> {
        self.blobs
            .get(&(execution_id.to_owned(), key.to_owned()))
            .map(|entry| entry.1.clone())
            .ok_or_else(|| EngineError::ArtifactMissing { key: key.to_owned() })
    }

    async fn list(&self, execution_id: &str) -> Result<Vec<Artifact>, EngineError> {
        let mut artifacts: Vec<Artifact> = self
            .blobs
            .iter()
            .filter(|entry| entry.key().0 == execution_id)
            .map(|entry| entry.value().0.clone())
            .collect();
        artifacts.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(artifacts)
    }

    async fn delete(&self, execution_id: &str, key: &str) -> Result<(), EngineError> {
        self.blobs
            .remove(&(execution_id.to_owned(), key.to_owned()))
            .map(|_| ())
            .ok_or_else(|| EngineError::ArtifactMissing { key: key.to_owned() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_computes_checksum_and_get_round_trips() {
        let store = InMemoryArtifactStore::default();
        let artifact = store.put("exec-1", "result.json", Bytes::from_static(b"{}")).await.unwrap();
        assert_eq!(artifact.checksum, sha256_hex(b"{}"));

        let data = store.get("exec-1", "result.json").await.unwrap();
        assert_eq!(data, Bytes::from_static(b"{}"));
    }

    #[tokio::test]
    async fn get_missing_artifact_fails() {
        let store = InMemoryArtifactStore::default();
        let err = store.get("exec-1", "missing").await.unwrap_err();
        assert!(matches!(err, EngineError::ArtifactMissing { .. }));
    }

    #[tokio::test]
    async fn list_is_ordered_lexicographically_by_key() {
        let store = InMemoryArtifactStore::default();
        store.put("exec-1", "b.txt", Bytes::from_static(b"b")).await.unwrap();
        store.put("exec-1", "a.txt", Bytes::from_static(b"a")).await.unwrap();

        let listed = store.list("exec-1").await.unwrap();
        let keys: Vec<_> = listed.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn verify_checksum_detects_mismatch() {
        let store = InMemoryArtifactStore::default();
        store.put("exec-1", "result.json", Bytes::from_static(b"{}")).await.unwrap();

        verify_checksum(&store, "exec-1", "result.json", &sha256_hex(b"{}")).await.unwrap();
        let err = verify_checksum(&store, "exec-1", "result.json", "deadbeef").await.unwrap_err();
        assert!(matches!(err, EngineError::ChecksumMismatch { .. }));
    }
}
