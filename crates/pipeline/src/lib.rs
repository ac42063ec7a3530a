//! Generation job lifecycle for character images.
//!
//! - [`submitter`]: mode-specific request building and submission
//! - [`poller`]: cancellable status polling of the active job
//! - [`resolver`]: turns result references into displayable URLs
//! - [`reconciler`]: keeps the visual archive and its persisted copy in step
//! - [`coordinator`]: ties the above together and applies results
//!
//! External services are reached through the traits in [`ports`].

pub mod coordinator;
pub mod error;
pub mod events;
pub mod poller;
pub mod ports;
pub mod reconciler;
pub mod resolver;
pub mod submitter;
