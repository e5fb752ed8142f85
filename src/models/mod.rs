//! Wire schema and domain model declarations.

pub mod operation;
pub mod request;
pub mod response;
pub mod settings;
