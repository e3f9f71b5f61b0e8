use crate::domain::entities::{MutationDraft, MutationRecord};
use crate::domain::value_objects::RecordId;
use crate::shared::error::AppError;
use async_trait::async_trait;

/// Crash-durable keyed store of pending write intents.
#[async_trait]
pub trait MutationQueue: Send + Sync {
    /// Upserts the intent for `draft.record_id`, replacing any previous entry.
    /// The record is durable once this returns `Ok`.
    async fn put(&self, draft: MutationDraft) -> Result<MutationRecord, AppError>;
    /// All queued records, oldest update first.
    async fn get_all(&self) -> Result<Vec<MutationRecord>, AppError>;
    async fn get(&self, record_id: &RecordId) -> Result<Option<MutationRecord>, AppError>;
    /// Idempotent delete.
    async fn remove(&self, record_id: &RecordId) -> Result<(), AppError>;
    /// Deletes the entry only while it still carries `version`.
    async fn remove_if_current(&self, record_id: &RecordId, version: u64)
        -> Result<bool, AppError>;
    async fn len(&self) -> Result<u32, AppError>;
}
