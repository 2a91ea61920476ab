//! Embedder selection from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `EMBEDDINGS_ENABLED` | `true` |
//! | `EMBED_BACKEND` | `ollama` (`ollama` or `openai`) |
//! | `OLLAMA_BASE` | `http://127.0.0.1:11434` |
//! | `OLLAMA_EMBED_MODEL` | `nomic-embed-text` |
//! | `OLLAMA_EMBED_DIM` | `768` |
//! | `OPENAI_BASE_URL` | `https://api.openai.com/v1` |
//! | `OPENAI_API_KEY` | unset |
//! | `OPENAI_EMBED_MODEL` | `text-embedding-3-small` |
//! | `OPENAI_EMBED_DIM` | `1536` |
//! | `EMBED_BATCH_SIZE` | `64` |
//! | `EMBED_TIMEOUT_SECS` | `60` |
//! | `EMBED_MAX_RETRIES` | `3` |

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use sitekb_core::{defaults, EmbeddingBackend, Error, Result};

use crate::BatchingEmbedder;

/// Which embedding API to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    Ollama,
    OpenAi,
}

impl FromStr for EmbedderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            other => Err(Error::Config(format!(
                "unknown EMBED_BACKEND {other:?} (expected ollama or openai)"
            ))),
        }
    }
}

/// Embedder settings.
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    /// When false, chunks are stored without vectors.
    pub enabled: bool,
    pub kind: EmbedderKind,
    pub ollama_base: String,
    pub ollama_model: String,
    pub ollama_dimension: usize,
    pub openai_base: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_dimension: usize,
    pub batch_size: usize,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kind: EmbedderKind::Ollama,
            ollama_base: defaults::OLLAMA_URL.to_string(),
            ollama_model: defaults::EMBED_MODEL.to_string(),
            ollama_dimension: defaults::EMBED_DIMENSION,
            openai_base: defaults::OPENAI_URL.to_string(),
            openai_api_key: None,
            openai_model: defaults::OPENAI_EMBED_MODEL.to_string(),
            openai_dimension: defaults::OPENAI_EMBED_DIMENSION,
            batch_size: defaults::EMBED_BATCH_SIZE,
            timeout: Duration::from_secs(defaults::EMBED_TIMEOUT_SECS),
            max_retries: defaults::EMBED_MAX_RETRIES,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.trim().parse().ok())
}

impl EmbedderConfig {
    /// Read the variables listed in the module docs.
    ///
    /// Fails only on an unrecognised `EMBED_BACKEND`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(enabled) = env_string("EMBEDDINGS_ENABLED") {
            config.enabled = !matches!(
                enabled.trim().to_ascii_lowercase().as_str(),
                "false" | "0" | "no" | "off"
            );
        }
        if let Some(kind) = env_string("EMBED_BACKEND") {
            config.kind = kind.parse()?;
        }
        if let Some(v) = env_string("OLLAMA_BASE") {
            config.ollama_base = v;
        }
        if let Some(v) = env_string("OLLAMA_EMBED_MODEL") {
            config.ollama_model = v;
        }
        if let Some(v) = env_parse("OLLAMA_EMBED_DIM") {
            config.ollama_dimension = v;
        }
        if let Some(v) = env_string("OPENAI_BASE_URL") {
            config.openai_base = v;
        }
        config.openai_api_key = env_string("OPENAI_API_KEY");
        if let Some(v) = env_string("OPENAI_EMBED_MODEL") {
            config.openai_model = v;
        }
        if let Some(v) = env_parse("OPENAI_EMBED_DIM") {
            config.openai_dimension = v;
        }
        if let Some(v) = env_parse::<usize>("EMBED_BATCH_SIZE") {
            config.batch_size = v.max(1);
        }
        if let Some(v) = env_parse::<u64>("EMBED_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(v.max(1));
        }
        if let Some(v) = env_parse("EMBED_MAX_RETRIES") {
            config.max_retries = v;
        }
        Ok(config)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_kind(mut self, kind: EmbedderKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_ollama(mut self, base: impl Into<String>, model: impl Into<String>) -> Self {
        self.ollama_base = base.into();
        self.ollama_model = model.into();
        self
    }

    pub fn with_openai(
        mut self,
        base: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        self.openai_base = base.into();
        self.openai_api_key = api_key;
        self.openai_model = model.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

/// Build the configured embedder, wrapped in a [`BatchingEmbedder`].
///
/// Returns `Ok(None)` when embeddings are disabled. An error here is a setup
/// failure: the caller cannot run builds with a broken embedder.
pub fn build_embedder(config: &EmbedderConfig) -> Result<Option<Arc<dyn EmbeddingBackend>>> {
    if !config.enabled {
        info!(
            subsystem = "inference",
            component = "config",
            "Embeddings disabled; chunks will be stored without vectors"
        );
        return Ok(None);
    }

    let backend: Arc<dyn EmbeddingBackend> = match config.kind {
        #[cfg(feature = "ollama")]
        EmbedderKind::Ollama => Arc::new(crate::OllamaEmbedder::new(
            config.ollama_base.clone(),
            config.ollama_model.clone(),
            config.ollama_dimension,
            config.timeout,
        )?),
        #[cfg(feature = "openai")]
        EmbedderKind::OpenAi => Arc::new(crate::OpenAiEmbedder::new(crate::OpenAiConfig {
            base_url: config.openai_base.clone(),
            api_key: config.openai_api_key.clone(),
            model: config.openai_model.clone(),
            dimension: config.openai_dimension,
            timeout: config.timeout,
        })?),
        #[allow(unreachable_patterns)]
        other => {
            return Err(Error::Config(format!(
                "embedder backend {other:?} not compiled in"
            )))
        }
    };

    Ok(Some(Arc::new(
        BatchingEmbedder::new(backend)
            .with_batch_size(config.batch_size)
            .with_max_retries(config.max_retries),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!("ollama".parse::<EmbedderKind>().unwrap(), EmbedderKind::Ollama);
        assert_eq!(" OpenAI ".parse::<EmbedderKind>().unwrap(), EmbedderKind::OpenAi);
        assert!(matches!(
            "cohere".parse::<EmbedderKind>(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_defaults() {
        let config = EmbedderConfig::default();
        assert!(config.enabled);
        assert_eq!(config.kind, EmbedderKind::Ollama);
        assert_eq!(config.ollama_model, "nomic-embed-text");
        assert_eq!(config.openai_model, "text-embedding-3-small");
        assert_eq!(config.batch_size, 64);
    }

    #[test]
    fn test_disabled_builds_nothing() {
        let built = build_embedder(&EmbedderConfig::default().with_enabled(false)).unwrap();
        assert!(built.is_none());
    }

    #[test]
    fn test_builds_selected_backend() {
        let ollama = build_embedder(&EmbedderConfig::default()).unwrap().unwrap();
        assert_eq!(ollama.model_name(), "nomic-embed-text");
        assert_eq!(ollama.dimension(), 768);

        let openai = build_embedder(
            &EmbedderConfig::default()
                .with_kind(EmbedderKind::OpenAi)
                .with_openai("http://localhost:8000/v1", None, "bge-small"),
        )
        .unwrap()
        .unwrap();
        assert_eq!(openai.model_name(), "bge-small");
        assert_eq!(openai.dimension(), 1536);
    }

    #[test]
    fn test_batch_size_floor() {
        assert_eq!(EmbedderConfig::default().with_batch_size(0).batch_size, 1);
    }
}
