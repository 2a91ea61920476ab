//! # sitekb-inference
//!
//! Embedding backends for sitekb.
//!
//! This crate provides:
//! - Ollama embedder (feature `ollama`, default)
//! - OpenAI-compatible embedder (feature `openai`, default)
//! - A batching/retrying wrapper shared by both
//! - A deterministic mock embedder (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use sitekb_inference::{build_embedder, EmbedderConfig};
//!
//! #[tokio::main]
//! async fn main() -> sitekb_core::Result<()> {
//!     let config = EmbedderConfig::from_env()?;
//!     if let Some(embedder) = build_embedder(&config)? {
//!         let vectors = embedder.embed_batch(&["Hello".to_string()]).await?;
//!         assert_eq!(vectors.len(), 1);
//!     }
//!     Ok(())
//! }
//! ```

pub mod batching;
pub mod config;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use batching::BatchingEmbedder;
pub use config::{build_embedder, EmbedderConfig, EmbedderKind};

#[cfg(feature = "ollama")]
pub use ollama::OllamaEmbedder;

#[cfg(feature = "openai")]
pub use openai::{OpenAiConfig, OpenAiEmbedder};

#[cfg(any(test, feature = "mock"))]
pub use mock::MockEmbedder;
