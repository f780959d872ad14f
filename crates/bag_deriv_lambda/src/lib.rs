//! AWS-oriented adapters and handlers for the bag derivative workers.
//!
//! This crate owns runtime integration details (Lambda handlers, queue
//! consumption, storage and queue adapters). Pure domain logic such as payload
//! contracts, storage keys, image renditions and PDF assembly lives in
//! `bag_deriv_core`.

pub mod adapters;
pub mod config;
pub mod deadline;
pub mod handlers;
pub mod runtime;
pub mod telemetry;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
