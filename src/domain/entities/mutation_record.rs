use crate::domain::value_objects::{FieldMap, RecordId};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A write intent before the queue has assigned it a version.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationDraft {
    pub record_id: RecordId,
    pub fields: FieldMap,
    pub captured_at: DateTime<Utc>,
    pub offline_origin: bool,
}

impl MutationDraft {
    pub fn new(record_id: RecordId, fields: FieldMap) -> Self {
        Self {
            record_id,
            fields,
            // ミリ秒精度で保存されるため揃えておく
            captured_at: Utc::now().trunc_subsecs(3),
            offline_origin: false,
        }
    }

    pub fn with_offline_origin(mut self, offline_origin: bool) -> Self {
        self.offline_origin = offline_origin;
        self
    }

    pub fn into_record(self, mutation_id: Uuid, version: u64) -> MutationRecord {
        MutationRecord {
            record_id: self.record_id,
            mutation_id,
            fields: self.fields,
            captured_at: self.captured_at,
            offline_origin: self.offline_origin,
            version,
        }
    }
}

/// Latest desired full field set for one remote record.
///
/// `version` comes from the durable queue's sequence and only ever grows, so
/// comparing it is enough to tell whether an in-flight write is still the
/// current intent. Version `0` marks a record that never reached the durable
/// queue (mirror-only fallback).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRecord {
    pub record_id: RecordId,
    pub mutation_id: Uuid,
    pub fields: FieldMap,
    pub captured_at: DateTime<Utc>,
    /// Diagnostic only.
    pub offline_origin: bool,
    pub version: u64,
}

impl MutationRecord {
    pub const UNVERSIONED: u64 = 0;

    pub fn unversioned(draft: MutationDraft) -> Self {
        draft.into_record(Uuid::new_v4(), Self::UNVERSIONED)
    }

    pub fn is_versioned(&self) -> bool {
        self.version != Self::UNVERSIONED
    }

    pub fn is_superseded_by(&self, other: &MutationRecord) -> bool {
        self.record_id == other.record_id && other.version > self.version
    }
}
