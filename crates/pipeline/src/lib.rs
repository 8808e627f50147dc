//! The claimwatch pipeline: stages that move a scraped article through
//! enrichment, claim extraction, lifecycle verification, and roundup
//! generation, all idempotent and lease-coordinated so any number of
//! workers can run them concurrently.

pub mod answers;
pub mod claims;
pub mod context;
pub mod dedupe;
pub mod enrich;
pub mod prompts;
pub mod roundups;
pub mod run;
pub mod schedule;
pub mod verify;

pub use context::StageContext;
