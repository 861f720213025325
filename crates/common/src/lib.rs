//! Common types for the FieldLink workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
