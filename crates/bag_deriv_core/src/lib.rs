//! Shared derivative-pipeline domain primitives.
//!
//! This crate owns the queue message contract, deterministic storage keys,
//! the outcome taxonomy and the two pure transformations (image renditions
//! and PDF assembly). It intentionally excludes AWS SDK and Lambda runtime
//! concerns.

pub mod contract;
pub mod outcome;
pub mod pdf_assembly;
pub mod rendition;
pub mod storage_keys;
