//! The gateway: sanitize → batch → call, under breaker and retry.

use std::sync::Arc;
use tracing::{debug, warn};

use nexsus_core::config::EmbeddingConfig;
use nexsus_core::error::{NexsusError, Result};
use nexsus_resilience::breaker::CircuitBreaker;
use nexsus_resilience::retry::{retry_with, RetryPolicy};

use crate::batch::plan_batches;
use crate::provider::{EmbeddingProvider, InputType};
use crate::sanitize::sanitize_all;

/// Batched, breaker-guarded front door to the embedding provider.
///
/// The contract is arity-preserving: one vector per input text, in input
/// order. Texts the provider individually rejects come back as zero
/// vectors, a poison value downstream recall may exclude.
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    config: EmbeddingConfig,
    /// Dimension of the collection's dense vectors; used for zero fills.
    vector_size: usize,
}

impl EmbeddingGateway {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        config: EmbeddingConfig,
        vector_size: usize,
    ) -> Self {
        Self {
            provider,
            breaker,
            retry,
            config,
            vector_size,
        }
    }

    pub fn zero_vector(&self) -> Vec<f32> {
        vec![0.0; self.vector_size]
    }

    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed(texts, InputType::Document).await
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()], InputType::Query).await?;
        Ok(vectors.pop().unwrap_or_else(|| self.zero_vector()))
    }

    /// Sanitize, batch, and embed. Errors only on transport exhaustion or
    /// an open breaker; rejections degrade to zero vectors.
    pub async fn embed(&self, texts: &[String], input_type: InputType) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let sanitized = sanitize_all(texts, self.config.max_text_chars);
        let batches = plan_batches(
            &sanitized,
            self.config.max_batch_tokens,
            self.config.max_batch_items,
        );

        let mut out: Vec<Option<Vec<f32>>> = vec![None; sanitized.len()];
        for (batch_no, indices) in batches.iter().enumerate() {
            let batch: Vec<String> = indices.iter().map(|i| sanitized[*i].clone()).collect();
            debug!(batch_no, size = batch.len(), "embedding batch");
            let vectors = self.embed_batch(&batch, input_type).await?;
            for (slot, vector) in indices.iter().zip(vectors) {
                out[*slot] = Some(vector);
            }
        }
        Ok(out
            .into_iter()
            .map(|v| v.unwrap_or_else(|| self.zero_vector()))
            .collect())
    }

    /// One batch under breaker+retry. `Rejected` degrades item-by-item.
    async fn embed_batch(&self, batch: &[String], input_type: InputType) -> Result<Vec<Vec<f32>>> {
        let attempt = self
            .breaker
            .call(|| {
                retry_with(self.retry, "embed_batch", || {
                    self.provider.embed(batch, input_type)
                })
            })
            .await;

        match attempt {
            Ok(vectors) => Ok(vectors),
            Err(NexsusError::Rejected { message, .. }) => {
                warn!(size = batch.len(), %message, "batch rejected, degrading to per-item calls");
                self.embed_one_by_one(batch, input_type).await
            }
            Err(err) => Err(err),
        }
    }

    async fn embed_one_by_one(
        &self,
        batch: &[String],
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(batch.len());
        for text in batch {
            let single = std::slice::from_ref(text);
            let attempt = self
                .breaker
                .call(|| {
                    retry_with(self.retry, "embed_single", || {
                        self.provider.embed(single, input_type)
                    })
                })
                .await;
            match attempt {
                Ok(mut vs) => vectors.push(vs.pop().unwrap_or_else(|| self.zero_vector())),
                Err(NexsusError::Rejected { message, .. }) => {
                    warn!(%message, "text rejected individually, substituting zero vector");
                    vectors.push(self.zero_vector());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SERVICE;
    use async_trait::async_trait;
    use nexsus_core::config::BreakerConfig;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Scripted provider: rejects any batch containing "bad", and any
    /// single text equal to "bad".
    struct Scripted {
        calls: Mutex<Vec<usize>>,
        dim: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for Scripted {
        async fn embed(&self, texts: &[String], _input_type: InputType) -> Result<Vec<Vec<f32>>> {
            self.calls.lock().push(texts.len());
            if texts.iter().any(|t| t.contains("bad")) {
                return Err(NexsusError::rejected(SERVICE, "400 Bad Request"));
            }
            Ok(texts.iter().map(|_| vec![1.0; self.dim]).collect())
        }
    }

    struct AlwaysDown;

    #[async_trait]
    impl EmbeddingProvider for AlwaysDown {
        async fn embed(&self, _texts: &[String], _input_type: InputType) -> Result<Vec<Vec<f32>>> {
            Err(NexsusError::transient(SERVICE, "503"))
        }
    }

    fn gateway(provider: Arc<dyn EmbeddingProvider>) -> EmbeddingGateway {
        let breaker = Arc::new(CircuitBreaker::new(
            SERVICE,
            BreakerConfig {
                failure_threshold: 3,
                reset_timeout: Duration::from_secs(30),
                half_open_successes: 2,
            },
        ));
        let retry = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let config = EmbeddingConfig {
            max_batch_tokens: 1000,
            max_batch_items: 10,
            max_text_chars: 100,
            ..Default::default()
        };
        EmbeddingGateway::new(provider, breaker, retry, config, 4)
    }

    #[tokio::test]
    async fn happy_path_is_arity_preserving() {
        let gw = gateway(Arc::new(Scripted {
            calls: Mutex::new(vec![]),
            dim: 4,
        }));
        let texts = vec!["a".into(), "b".into(), "c".into()];
        let vectors = gw.embed_documents(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert!(vectors.iter().all(|v| v.len() == 4));
    }

    #[tokio::test]
    async fn batch_rejection_degrades_with_zero_vectors() {
        let provider = Arc::new(Scripted {
            calls: Mutex::new(vec![]),
            dim: 4,
        });
        let gw = gateway(provider.clone());
        let texts = vec!["good one".into(), "bad apple".into(), "fine".into()];
        let vectors = gw.embed_documents(&texts).await.unwrap();

        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vec![1.0; 4]);
        assert_eq!(vectors[1], vec![0.0; 4]); // rejected → zero vector
        assert_eq!(vectors[2], vec![1.0; 4]);

        // One batch call, then three singles.
        let calls = provider.calls.lock().clone();
        assert_eq!(calls, vec![3, 1, 1, 1]);
    }

    #[tokio::test]
    async fn transport_failure_propagates_after_retries() {
        let gw = gateway(Arc::new(AlwaysDown));
        let err = gw.embed_documents(&["x".into()]).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn breaker_opens_after_repeated_transport_failures() {
        let gw = gateway(Arc::new(AlwaysDown));
        for _ in 0..3 {
            let _ = gw.embed_documents(&["x".into()]).await;
        }
        let err = gw.embed_documents(&["x".into()]).await.unwrap_err();
        assert!(matches!(err, NexsusError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn empty_input_returns_empty() {
        let gw = gateway(Arc::new(AlwaysDown));
        assert!(gw.embed_documents(&[]).await.unwrap().is_empty());
    }
}
