//! Domain logic for character visual generation.
//!
//! Everything in this crate is synchronous and free of I/O: reference
//! classification, the visual archive and its primary-portrait rule,
//! the archive payload codec, generation job state, the per-session
//! job bookkeeping, prompt templates and polling policy.

pub mod archive;
pub mod archive_payload;
pub mod error;
pub mod generation;
pub mod job_session;
pub mod media;
pub mod polling;
pub mod prompt_template;
pub mod types;
