pub mod bson_ext;
pub mod json;
pub mod validate;
