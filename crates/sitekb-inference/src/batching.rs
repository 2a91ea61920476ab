//! Batch splitting and retry around any [`EmbeddingBackend`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use sitekb_core::{defaults, EmbeddingBackend, Error, Result, Vector};

/// Splits large inputs into backend-sized batches and retries transient
/// failures with exponential backoff.
///
/// Only [`Error::Embedding`] is retried. Configuration errors (bad key,
/// unknown model) are returned on first sight.
pub struct BatchingEmbedder {
    inner: Arc<dyn EmbeddingBackend>,
    batch_size: usize,
    max_retries: u32,
    base_delay: Duration,
}

impl BatchingEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingBackend>) -> Self {
        Self {
            inner,
            batch_size: defaults::EMBED_BATCH_SIZE,
            max_retries: defaults::EMBED_MAX_RETRIES,
            base_delay: Duration::from_secs(1),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    async fn embed_with_retry(&self, batch: &[String]) -> Result<Vec<Vector>> {
        let mut retry = 0;
        loop {
            match self.inner.embed_batch(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(e @ Error::Embedding(_)) if retry < self.max_retries => {
                    retry += 1;
                    let delay = self.base_delay.saturating_mul(2u32.saturating_pow(retry - 1));
                    warn!(
                        subsystem = "inference",
                        component = "batching",
                        model = %self.inner.model_name(),
                        attempt = retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying embedding batch"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl EmbeddingBackend for BatchingEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(
                subsystem = "inference",
                component = "batching",
                batch = i,
                input_count = batch.len(),
                "Embedding batch"
            );
            vectors.extend(self.embed_with_retry(batch).await?);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
