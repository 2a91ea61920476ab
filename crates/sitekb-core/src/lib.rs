//! # sitekb-core
//!
//! Core types, traits, and abstractions for sitekb, a worker that turns
//! websites into versioned, searchable knowledge bases.
//!
//! This crate provides the data model, the typed task config, the shared
//! error type, and the repository and collaborator traits the other crates
//! implement.

pub mod defaults;
pub mod error;
pub mod hashing;
pub mod logging;
pub mod models;
pub mod task;
pub mod task_config;
pub mod tokenizer;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use hashing::{content_hash, url_hash};
pub use models::*;
pub use pgvector::Vector;
pub use task::{QueuedTask, RetryPolicy, StopFlag, TaskDisposition, TaskOutcome, STOPPED_REASON};
pub use task_config::{BuildProgress, TaskConfig};
pub use tokenizer::estimate_tokens;
pub use traits::*;
pub use uuid_utils::{extract_timestamp, is_v7, new_v7};
