//! Resilient embedding generation across interchangeable backends.
//!
//! `embedrail` sits between an application and its embedding backends
//! (a cloud API, a local inference server, an in-process model) and
//! keeps vectors flowing when individual backends misbehave. Around
//! every provider call it layers:
//!
//! - a closed error taxonomy with an explicit retry polarity per
//!   failure ([`providers::ErrorKind`]),
//! - exponential backoff with jitter, honoring server-suggested
//!   rate-limit delays ([`retry::BackoffPolicy`]),
//! - a per-provider circuit breaker ([`breaker`]),
//! - host resource validation, so embedding work never starves the
//!   machine of memory or disk ([`resources`]),
//! - and ordered fallback across the remaining healthy providers
//!   ([`fallback::FallbackChain`]).
//!
//! # Example
//!
//! ```no_run
//! use embedrail::{Config, FallbackChain};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_toml_str("")?;
//!
//!     let registry = embedrail::populated_registry(&config, None).await?;
//!     registry.start();
//!
//!     let chain = FallbackChain::new(registry, config.policy.request_timeout());
//!     let outcome = chain.embed_with_fallback(&["hello".to_string()]).await?;
//!
//!     println!(
//!         "{} vectors from {:?}",
//!         outcome.vectors.len(),
//!         outcome.provider_used()
//!     );
//!
//!     Ok(())
//! }
//! ```

pub mod breaker;
pub mod config;
pub mod fallback;
pub mod providers;
pub mod registry;
pub mod resources;
pub mod retry;

pub use breaker::{BreakerConfig, BreakerState};
pub use config::{ActivationPolicy, Config, ConfigError};
pub use fallback::{FallbackChain, FallbackError, FallbackOutcome, ProviderSegment};
pub use providers::{
    BackendKind, EmbedEngine, EmbedResponse, EmbeddingProvider, Error, ErrorKind, LocalProvider,
    OllamaProvider, OpenAIProvider, ProviderDescriptor, ProviderId, Usage,
};
pub use registry::{
    populated_registry, PopulateError, ProviderInfo, ProviderRegistry, ProviderStats,
    RegistryError,
};
pub use resources::{
    HostSampler, OperationEstimate, Pressure, ResourceMonitor, ResourceSampler,
    ResourceThresholds, Snapshot,
};
pub use retry::BackoffPolicy;
