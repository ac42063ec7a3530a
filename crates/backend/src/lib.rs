//! HTTP clients for the generation backend and the character record.
//!
//! Provides typed request/response messages, the generation REST client
//! (job creation, status, image resolution, failure reports) and the
//! character persistence client.

pub mod api;
pub mod messages;
pub mod store;
