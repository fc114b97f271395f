pub mod mount;
pub mod policies;
pub mod status;
pub mod validate;
