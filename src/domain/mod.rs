pub mod assignment;
pub mod entities;
pub mod value_objects;
