//! Document store: file-backed typed collections with cross-process
//! advisory locking, recursive date normalization on write, and the
//! TTL work-lease layer cooperative workers coordinate through.

pub mod collection;
pub mod handles;
pub mod lease;
pub mod normalize;

pub use collection::{Collection, Doc, FileStore};
pub use handles::Stores;
