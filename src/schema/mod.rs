pub mod field_type;
pub mod mappings;
