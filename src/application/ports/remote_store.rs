use crate::domain::value_objects::{FieldMap, RecordId};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Transport failure; the write did not reach the authority.
    #[error("Remote request failed: {0}")]
    Failed(String),
    /// The authority refused the record as a whole.
    #[error("Remote authority rejected the record: {0}")]
    Rejected(String),
    /// Outcome unknown (timeout, dropped response). Treated as not applied.
    #[error("Remote outcome unknown: {0}")]
    Ambiguous(String),
    #[error("Remote record not found: {0}")]
    NotFound(String),
}

impl RemoteError {
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteError::Failed(_) => "failed",
            RemoteError::Rejected(_) => "rejected",
            RemoteError::Ambiguous(_) => "ambiguous",
            RemoteError::NotFound(_) => "not_found",
        }
    }
}

/// The remote record authority.
///
/// `write_fields` must be idempotent: sending the same full field set twice
/// leaves the record as sending it once would. Queue retries rely on this.
/// A write either applies every field or none of them.
#[async_trait]
pub trait RemoteRecordStore: Send + Sync {
    async fn write_fields(
        &self,
        record_id: &RecordId,
        fields: &FieldMap,
    ) -> Result<(), RemoteError>;

    /// Reads the named fields; an empty `names` slice reads every field.
    async fn read_fields(
        &self,
        record_id: &RecordId,
        names: &[&str],
    ) -> Result<FieldMap, RemoteError>;
}
