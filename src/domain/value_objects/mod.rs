pub mod field_value;
pub mod record_id;
pub mod unit_id;

pub use field_value::{field_map, FieldMap, FieldValue};
pub use record_id::RecordId;
pub use unit_id::{OwnerId, UnitId};
