use crate::domain::entities::MutationRecord;
use crate::domain::value_objects::RecordId;
use crate::shared::config::StorageConfig;
use crate::shared::error::AppError;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Whole pending set serialized as one JSON list.
///
/// No transactions and no crash consistency: the file is rewritten on every
/// change. The durable queue stays authoritative whenever both hold a record.
pub struct MirrorCache {
    path: Option<PathBuf>,
    docs: RwLock<Vec<MutationRecord>>,
}

impl MirrorCache {
    /// Loads the list stored at `path`. A missing or unreadable file starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let docs = load_docs(&path).await;
        Self {
            path: Some(path),
            docs: RwLock::new(docs),
        }
    }

    pub async fn from_config(config: &StorageConfig) -> Self {
        Self::open(config.mirror_path()).await
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            docs: RwLock::new(Vec::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn cache_doc(&self, doc: MutationRecord) -> Result<(), AppError> {
        let mut docs = self.docs.write().await;
        match docs
            .iter_mut()
            .find(|existing| existing.record_id == doc.record_id)
        {
            Some(existing) => *existing = doc,
            None => docs.push(doc),
        }
        self.persist(&docs).await
    }

    pub async fn remove_cached_doc(&self, record_id: &RecordId) -> Result<bool, AppError> {
        let mut docs = self.docs.write().await;
        let before = docs.len();
        docs.retain(|doc| &doc.record_id != record_id);
        if docs.len() == before {
            return Ok(false);
        }
        self.persist(&docs).await?;
        Ok(true)
    }

    /// Removes the entry for `sent.record_id` only if it is still that exact mutation.
    pub async fn remove_cached_doc_if_matches(
        &self,
        sent: &MutationRecord,
    ) -> Result<bool, AppError> {
        let mut docs = self.docs.write().await;
        let before = docs.len();
        docs.retain(|doc| !(doc.record_id == sent.record_id && doc.mutation_id == sent.mutation_id));
        if docs.len() == before {
            return Ok(false);
        }
        self.persist(&docs).await?;
        Ok(true)
    }

    pub async fn clear_all_cached_docs(&self) -> Result<(), AppError> {
        let mut docs = self.docs.write().await;
        docs.clear();
        self.persist(&docs).await
    }

    pub async fn get_cached_docs(&self) -> Vec<MutationRecord> {
        self.docs.read().await.clone()
    }

    pub async fn contains(&self, record_id: &RecordId) -> bool {
        self.docs
            .read()
            .await
            .iter()
            .any(|doc| &doc.record_id == record_id)
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    async fn persist(&self, docs: &[MutationRecord]) -> Result<(), AppError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec(docs)?;
        // 一時ファイルに書いてから置き換える
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

async fn load_docs(path: &Path) -> Vec<MutationRecord> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            tracing::warn!(
                target: "sync::mirror",
                path = %path.display(),
                error = %err,
                "mirror cache unreadable, starting empty"
            );
            return Vec::new();
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(docs) => docs,
        Err(err) => {
            tracing::warn!(
                target: "sync::mirror",
                path = %path.display(),
                error = %err,
                "mirror cache corrupt, starting empty"
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::MutationDraft;
    use crate::domain::value_objects::{field_map, FieldValue};
    use tempfile::TempDir;

    fn doc(id: &str, loads: i64) -> MutationRecord {
        MutationRecord::unversioned(MutationDraft::new(
            RecordId::new(id.to_string()).unwrap(),
            field_map([("loads", loads)]),
        ))
    }

    #[tokio::test]
    async fn test_cache_doc_upserts_by_record_id() {
        let cache = MirrorCache::in_memory();
        cache.cache_doc(doc("R1", 5)).await.unwrap();
        cache.cache_doc(doc("R2", 1)).await.unwrap();
        cache.cache_doc(doc("R1", 9)).await.unwrap();

        let docs = cache.get_cached_docs().await;
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].record_id.as_str(), "R1");
        assert_eq!(docs[0].fields["loads"], FieldValue::Integer(9));
    }

    #[tokio::test]
    async fn test_remove_if_matches_keeps_newer_doc() {
        let cache = MirrorCache::in_memory();
        let old = doc("R1", 5);
        cache.cache_doc(old.clone()).await.unwrap();
        let newer = doc("R1", 9);
        cache.cache_doc(newer.clone()).await.unwrap();

        assert!(!cache.remove_cached_doc_if_matches(&old).await.unwrap());
        assert!(cache.contains(&newer.record_id).await);
        assert!(cache.remove_cached_doc_if_matches(&newer).await.unwrap());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_persists_and_reloads_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("offline_docs.json");

        let cache = MirrorCache::open(&path).await;
        cache.cache_doc(doc("R1", 5)).await.unwrap();
        cache.cache_doc(doc("R2", 6)).await.unwrap();
        assert!(cache
            .remove_cached_doc(&RecordId::new("R2".into()).unwrap())
            .await
            .unwrap());

        let reloaded = MirrorCache::open(&path).await;
        assert_eq!(reloaded.get_cached_docs().await, cache.get_cached_docs().await);

        reloaded.clear_all_cached_docs().await.unwrap();
        assert!(MirrorCache::open(&path).await.is_empty().await);
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("offline_docs.json");
        std::fs::write(&path, b"{not json").unwrap();

        let cache = MirrorCache::open(&path).await;
        assert!(cache.is_empty().await);
        cache.cache_doc(doc("R1", 1)).await.unwrap();
        assert_eq!(MirrorCache::open(&path).await.len().await, 1);
    }
}
