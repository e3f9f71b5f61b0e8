use crate::domain::entities::MutationRecord;
use crate::domain::value_objects::{FieldMap, RecordId};
use crate::shared::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MutationRow {
    pub record_id: String,
    pub mutation_id: String,
    pub fields: String,
    pub captured_at: i64,
    pub offline_origin: bool,
    pub version: i64,
}

impl TryFrom<MutationRow> for MutationRecord {
    type Error = AppError;

    fn try_from(row: MutationRow) -> Result<Self, Self::Error> {
        let record_id = RecordId::new(row.record_id).map_err(AppError::SerializationError)?;
        let mutation_id = Uuid::parse_str(&row.mutation_id)
            .map_err(|err| AppError::SerializationError(format!("mutation_id: {err}")))?;
        let fields: FieldMap = serde_json::from_str(&row.fields)?;
        let version = u64::try_from(row.version).map_err(|_| {
            AppError::SerializationError(format!("negative version {}", row.version))
        })?;

        Ok(MutationRecord {
            record_id,
            mutation_id,
            fields,
            captured_at: millis_to_datetime(row.captured_at)?,
            offline_origin: row.offline_origin,
            version,
        })
    }
}

pub fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, AppError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| AppError::SerializationError(format!("timestamp out of range: {millis}")))
}
