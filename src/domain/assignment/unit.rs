use crate::domain::value_objects::{FieldMap, FieldValue, OwnerId, UnitId};
use crate::shared::error::AppError;
use serde::{Deserialize, Serialize};

/// Owner-linking field: the owner the unit works for.
pub const OWNER_FIELD: &str = "owner_id";
/// Owner-linking field: working area inherited from the owner.
pub const WORK_AREA_FIELD: &str = "work_area";
/// Owner-scoped quantity; meaningless once the owner changes.
pub const LOADS_FIELD: &str = "loads";

const RESERVED_FIELDS: [&str; 3] = [OWNER_FIELD, WORK_AREA_FIELD, LOADS_FIELD];

pub fn is_reserved_field(name: &str) -> bool {
    RESERVED_FIELDS.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitState {
    Unassigned,
    AssignedTo(OwnerId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerUnit {
    pub id: OwnerId,
    /// Default working-area tag handed to units assigned here.
    pub work_area: Option<String>,
}

impl OwnerUnit {
    pub fn new(id: OwnerId) -> Self {
        Self {
            id,
            work_area: None,
        }
    }

    pub fn with_work_area(mut self, work_area: impl Into<String>) -> Self {
        self.work_area = Some(work_area.into());
        self
    }
}

/// A movable unit and the fields it persists to its remote record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentUnit {
    pub id: UnitId,
    pub owner_id: Option<OwnerId>,
    pub work_area: Option<String>,
    pub loads: u32,
    /// Intrinsic attributes (material, geological layer, ...).
    pub attributes: FieldMap,
}

impl AssignmentUnit {
    pub fn new(id: UnitId) -> Self {
        Self {
            id,
            owner_id: None,
            work_area: None,
            loads: 0,
            attributes: FieldMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        let name = name.into();
        if !is_reserved_field(&name) {
            self.attributes.insert(name, value.into());
        }
        self
    }

    pub fn state(&self) -> UnitState {
        match &self.owner_id {
            Some(owner) => UnitState::AssignedTo(owner.clone()),
            None => UnitState::Unassigned,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&FieldValue> {
        self.attributes.get(name)
    }

    /// Full field set written to the remote record.
    pub fn to_fields(&self) -> FieldMap {
        let mut fields = self.attributes.clone();
        fields.insert(
            OWNER_FIELD.to_string(),
            FieldValue::from(self.owner_id.as_ref().map(|id| id.to_string())),
        );
        fields.insert(
            WORK_AREA_FIELD.to_string(),
            FieldValue::from(self.work_area.clone()),
        );
        fields.insert(LOADS_FIELD.to_string(), FieldValue::from(self.loads));
        fields
    }

    /// Rebuilds a unit from a record's field set (remote read or queued intent).
    pub fn from_fields(id: UnitId, fields: &FieldMap) -> Result<Self, AppError> {
        let mut unit = Self::new(id);
        for (name, value) in fields {
            match name.as_str() {
                OWNER_FIELD => unit.owner_id = parse_owner(value)?,
                WORK_AREA_FIELD => unit.work_area = parse_optional_text(name, value)?,
                LOADS_FIELD => unit.loads = parse_loads(value)?,
                _ => {
                    unit.attributes.insert(name.clone(), value.clone());
                }
            }
        }
        Ok(unit)
    }

    pub(super) fn link_owner(&mut self, owner: &OwnerUnit) {
        self.owner_id = Some(owner.id.clone());
        self.work_area = owner.work_area.clone();
        self.loads = 0;
    }

    /// Resets every owner-dependent field. The intrinsic subset is taken out
    /// before the reset and put back afterwards, so it survives untouched.
    pub(super) fn clear_owner(&mut self) {
        // 固有属性を退避してから所有者由来の項目を初期化する
        let intrinsic = std::mem::take(&mut self.attributes);
        *self = Self {
            attributes: intrinsic,
            ..Self::new(self.id.clone())
        };
    }
}

pub(super) fn parse_owner(value: &FieldValue) -> Result<Option<OwnerId>, AppError> {
    match value {
        FieldValue::Null => Ok(None),
        FieldValue::Text(raw) => OwnerId::new(raw.clone())
            .map(Some)
            .map_err(AppError::ValidationError),
        other => Err(AppError::ValidationError(format!(
            "{OWNER_FIELD} must be a string or null, got {}",
            other.type_name()
        ))),
    }
}

pub(super) fn parse_optional_text(
    name: &str,
    value: &FieldValue,
) -> Result<Option<String>, AppError> {
    match value {
        FieldValue::Null => Ok(None),
        FieldValue::Text(raw) => Ok(Some(raw.clone())),
        other => Err(AppError::ValidationError(format!(
            "{name} must be a string or null, got {}",
            other.type_name()
        ))),
    }
}

pub(super) fn parse_loads(value: &FieldValue) -> Result<u32, AppError> {
    if value.is_null() {
        return Ok(0);
    }
    value
        .as_i64()
        .and_then(|raw| u32::try_from(raw).ok())
        .ok_or_else(|| {
            AppError::ValidationError(format!(
                "{LOADS_FIELD} must be a non-negative whole number, got {value}"
            ))
        })
}
