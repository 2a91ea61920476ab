//! Deterministic embedder for tests.
//!
//! The same text always maps to the same unit vector, so tests can assert on
//! stored embeddings without a model server.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use sitekb_core::{EmbeddingBackend, Error, Result, Vector};

/// Mock embedding backend with a call log.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimension: usize,
    model: String,
    fail_marker: Option<String>,
    calls: Arc<Mutex<Vec<usize>>>,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            model: "mock-embed".to_string(),
            fail_marker: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Fail any batch containing a text with `marker` in it.
    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }

    /// Batch sizes of every call so far, in order.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    /// Deterministic unit vector for `text`.
    pub fn generate(text: &str, dimension: usize) -> Vec<f32> {
        let dimension = dimension.max(1);
        let mut vec = vec![0.0f32; dimension];
        for (i, c) in text.chars().enumerate() {
            vec[(c as usize + i) % dimension] += 0.1;
        }
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vec.iter_mut().for_each(|x| *x /= norm);
        }
        vec
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(texts.len());
        }
        if let Some(marker) = &self.fail_marker {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                return Err(Error::Embedding(format!("mock failure on {marker:?}")));
            }
        }
        Ok(texts
            .iter()
            .map(|t| Vector::from(Self::generate(t, self.dimension)))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_deterministic_and_normalized() {
        let a = MockEmbedder::generate("hello world", 16);
        let b = MockEmbedder::generate("hello world", 16);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_ne!(a, MockEmbedder::generate("goodbye", 16));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        assert!(MockEmbedder::generate("", 4).iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_embed_batch_logs_calls() {
        let embedder = MockEmbedder::new(8);
        let out = embedder
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_slice().len(), 8);
        assert_eq!(embedder.calls(), vec![2]);
    }

    #[tokio::test]
    async fn test_failing_marker() {
        let embedder = MockEmbedder::new(4).failing_on("BOOM");
        assert!(embedder.embed_batch(&["fine".to_string()]).await.is_ok());
        let err = embedder
            .embed_batch(&["fine".to_string(), "BOOM here".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
        assert_eq!(embedder.call_count(), 2);
    }
}
