//! Core domain types for claimwatch: the entities the pipeline persists,
//! the date algebra everything runs on, the structured shapes LLM output
//! binds against, and the shared error type.

pub mod config;
pub mod dates;
pub mod error;
pub mod model;
pub mod outputs;

pub use error::{Error, Result};
