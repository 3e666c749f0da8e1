pub mod build;
pub mod inventory;
pub mod status;
pub mod validate;
