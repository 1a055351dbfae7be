//! In-process provider for hardware-accelerated local models.
//!
//! The crate deliberately contains no inference code: callers bring
//! their own engine (an ONNX session, a candle model, a test stub)
//! behind the [`EmbedEngine`] trait, and [`LocalProvider`] adapts it to
//! the [`EmbeddingProvider`] interface so it participates in breaker
//! gating, statistics, and fallback like any remote backend.

use async_trait::async_trait;
use std::sync::Arc;

use crate::providers::{
    BackendKind, EmbedResponse, EmbeddingProvider, Error, ErrorKind, Usage,
};

/// A synchronous, in-process embedding engine.
///
/// Engines are black boxes returning one vector per input text, or a
/// printable failure.
pub trait EmbedEngine: Send + Sync {
    /// Embedding dimensionality of the engine's vectors.
    fn dim(&self) -> usize;

    /// Compute embeddings for a batch of input texts.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String>;
}

/// Adapter exposing an [`EmbedEngine`] as an [`EmbeddingProvider`].
pub struct LocalProvider {
    engine: Arc<dyn EmbedEngine>,
}

impl LocalProvider {
    pub fn new(engine: Arc<dyn EmbedEngine>) -> LocalProvider {
        LocalProvider { engine }
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn backend(&self) -> BackendKind {
        BackendKind::LocalAccelerated
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, Error> {
        let engine = Arc::clone(&self.engine);
        let texts = texts.to_vec();

        // Inference is CPU/GPU bound; keep it off the async workers.
        let vectors = tokio::task::spawn_blocking(move || engine.embed_batch(&texts))
            .await
            .map_err(|e| Error::from_source(ErrorKind::Unknown, Box::new(e)))?
            .map_err(|msg| {
                Error::from_source(ErrorKind::ProviderUnavailable, msg.into())
                    .with_retryable(false)
            })?;

        Ok(EmbedResponse {
            vectors,
            usage: Usage::default(),
        })
    }

    async fn healthcheck(&self) -> Result<(), Error> {
        // The engine lives in-process; if we are running, it is loaded.
        Ok(())
    }
}
