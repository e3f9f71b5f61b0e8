pub mod model;
pub mod unit;


pub use model::{AssignmentModel, SharedAssignmentModel};
pub use unit::{
    AssignmentUnit, OwnerUnit, UnitState, LOADS_FIELD, OWNER_FIELD, WORK_AREA_FIELD,
};
