//! Cross-provider fallback for embed requests.
//!
//! The chain is the crate's front door: callers hand it a batch of
//! texts and it walks the registry's preference-ordered healthy
//! providers until every text has a vector. Oversized batches are split
//! to each provider's declared batch limit; a healthy provider absorbs
//! its own remainder chunk by chunk, and the next candidate is engaged
//! only when the current one fails. Progress made before a provider
//! fails is kept; the next candidate continues from where the failed
//! one stopped. When every candidate has been exhausted the caller gets
//! one error naming each provider and why it was skipped or failed.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error as ThisError;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::providers::ProviderId;
use crate::registry::{ProviderInfo, ProviderRegistry};

/// A run of consecutive texts embedded by one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSegment {
    pub provider: ProviderId,
    pub count: usize,
}

/// A fully embedded batch and the providers that produced it.
#[derive(Debug)]
pub struct FallbackOutcome {
    /// One vector per input text, in input order.
    pub vectors: Vec<Vec<f32>>,
    /// Which provider embedded which run of texts, in input order.
    /// A single segment is the common case; more appear only when a
    /// provider failed partway through a split batch.
    pub segments: Vec<ProviderSegment>,
}

impl FallbackOutcome {
    /// The provider that served the batch (the first, when a mid-batch
    /// fallback split it across several).
    pub fn provider_used(&self) -> Option<&ProviderId> {
        self.segments.first().map(|segment| &segment.provider)
    }
}

#[derive(ThisError, Debug)]
pub enum FallbackError {
    #[error("cannot embed an empty batch")]
    EmptyBatch,

    /// Every registered provider was either skipped or failed. The
    /// failure list pairs each provider with the reason, in the order
    /// they were considered.
    #[error("{}", exhausted_summary(failures))]
    Exhausted { failures: Vec<(ProviderId, String)> },
}

fn exhausted_summary(failures: &[(ProviderId, String)]) -> String {
    if failures.is_empty() {
        return "no providers are registered".to_string();
    }

    let parts: Vec<String> = failures
        .iter()
        .map(|(id, reason)| format!("{id}: {reason}"))
        .collect();

    format!("all providers failed ({})", parts.join("; "))
}

/// Embeds batches through the most preferred healthy provider, falling
/// back across the registry on failure.
pub struct FallbackChain {
    registry: Arc<ProviderRegistry>,
    request_timeout: Duration,
}

impl FallbackChain {
    /// `request_timeout` bounds one logical request end to end: every
    /// provider tried, every retry, every backoff sleep.
    pub fn new(registry: Arc<ProviderRegistry>, request_timeout: Duration) -> FallbackChain {
        FallbackChain {
            registry,
            request_timeout,
        }
    }

    /// Embed `texts`, returning one vector per text in input order.
    pub async fn embed_with_fallback(
        &self,
        texts: &[String],
    ) -> Result<FallbackOutcome, FallbackError> {
        if texts.is_empty() {
            return Err(FallbackError::EmptyBatch);
        }

        let deadline = Instant::now() + self.request_timeout;
        let candidates = self.registry.healthy_providers();

        let mut failures: Vec<(ProviderId, String)> = Vec::new();
        self.record_skipped(&candidates, &mut failures);

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        let mut segments: Vec<ProviderSegment> = Vec::new();
        let mut index = 0;

        for id in candidates {
            let descriptor = match self.registry.descriptor(&id) {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    failures.push((id, err.to_string()));
                    continue;
                }
            };

            let mut embedded_here = 0;

            while index < texts.len() {
                let take = descriptor.max_batch_size.max(1).min(texts.len() - index);
                let chunk = &texts[index..index + take];

                match self.registry.embed_batch(&id, chunk, deadline).await {
                    Ok(response) => {
                        vectors.extend(response.vectors);
                        index += take;
                        embedded_here += take;
                    }
                    Err(err) => {
                        warn!(provider = %id, error = %err, "provider failed, falling back");
                        failures.push((id.clone(), err.to_string()));
                        break;
                    }
                }
            }

            if embedded_here > 0 {
                segments.push(ProviderSegment {
                    provider: id,
                    count: embedded_here,
                });
            }

            if index == texts.len() {
                debug!(
                    texts = texts.len(),
                    providers = segments.len(),
                    "batch embedded"
                );

                return Ok(FallbackOutcome { vectors, segments });
            }
        }

        Err(FallbackError::Exhausted { failures })
    }

    /// A snapshot of every registered provider.
    pub fn provider_info(&self) -> Vec<ProviderInfo> {
        self.registry.provider_info()
    }

    /// Record why unhealthy providers were never candidates, so an
    /// exhausted chain can explain the full picture.
    fn record_skipped(
        &self,
        candidates: &[ProviderId],
        failures: &mut Vec<(ProviderId, String)>,
    ) {
        for info in self.registry.provider_info() {
            if candidates.contains(&info.descriptor.id) {
                continue;
            }

            let reason = if !info.available {
                match &info.last_error {
                    Some(err) => format!("unhealthy: {err}"),
                    None => "unhealthy".to_string(),
                }
            } else {
                "circuit breaker open".to_string()
            };

            failures.push((info.descriptor.id, reason));
        }
    }
}
