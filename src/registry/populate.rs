//! Builds a populated registry from configuration.
//!
//! Each configured backend is activated according to its policy: `auto`
//! activates when the prerequisites are present (an API key for OpenAI,
//! a reachable server for Ollama, a supplied engine for the local
//! provider) and skips quietly otherwise; `enabled` treats a missing
//! prerequisite as an error; `disabled` never activates.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::{debug, info};

use crate::config::{ActivationPolicy, Config};
use crate::providers::{
    BackendKind, EmbedEngine, Error, LocalProvider, OllamaProvider, OpenAIProvider,
    ProviderDescriptor,
};
use crate::registry::{ProviderRegistry, RegistryError};
use crate::resources::{HostSampler, ResourceMonitor};

const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";

const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
const DEFAULT_OPENAI_DIMENSION: usize = 1536;
const DEFAULT_OPENAI_COST_PER_TOKEN: f64 = 0.000_000_02;
const DEFAULT_OPENAI_MAX_BATCH: usize = 2048;

const DEFAULT_OLLAMA_MODEL: &str = "nomic-embed-text";
const DEFAULT_OLLAMA_DIMENSION: usize = 768;
const DEFAULT_OLLAMA_MAX_BATCH: usize = 64;

const DEFAULT_LOCAL_MAX_BATCH: usize = 64;

#[derive(ThisError, Debug)]
pub enum PopulateError {
    #[error("openai is enabled but no API key was found (set providers.openai.api_key or OPENAI_API_KEY)")]
    MissingOpenAIKey,

    #[error("ollama is enabled but unreachable")]
    OllamaUnreachable(#[source] Error),

    #[error("the local provider is enabled but no engine was supplied")]
    MissingLocalEngine,

    #[error("invalid provider configuration")]
    InvalidProvider(#[source] Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Build a registry holding every provider the configuration activates.
///
/// `local_engine` is the caller's in-process model, if they have one;
/// it backs the `[providers.local]` table. The returned registry is not
/// started; call [`ProviderRegistry::start`] to begin resource sampling
/// and health ticking.
pub async fn populated_registry(
    config: &Config,
    local_engine: Option<Arc<dyn EmbedEngine>>,
) -> Result<Arc<ProviderRegistry>, PopulateError> {
    let resources = &config.policy.resources;
    let monitor = ResourceMonitor::with_intervals(
        Arc::new(HostSampler::new(
            env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
        )),
        resources.to_thresholds(),
        resources.sample_interval(),
        resources.staleness_ttl(),
    );

    let registry = Arc::new(ProviderRegistry::new(
        config.policy.backoff.to_backoff_policy(),
        config.policy.breaker.to_breaker_config(),
        Arc::new(monitor),
        config.policy.health_check_interval(),
    ));

    populate_local(&registry, config, local_engine)?;
    populate_ollama(&registry, config).await?;
    populate_openai(&registry, config)?;

    Ok(registry)
}

fn populate_local(
    registry: &ProviderRegistry,
    config: &Config,
    engine: Option<Arc<dyn EmbedEngine>>,
) -> Result<(), PopulateError> {
    let local = &config.providers.local;

    if local.activate == ActivationPolicy::Disabled {
        debug!("local provider disabled, skipping");
        return Ok(());
    }

    let engine = match engine {
        Some(engine) => engine,
        None if local.activate == ActivationPolicy::Enabled => {
            return Err(PopulateError::MissingLocalEngine);
        }
        None => {
            debug!("no local engine supplied, skipping");
            return Ok(());
        }
    };

    let id = local.id.as_deref().unwrap_or("local");
    let descriptor = ProviderDescriptor {
        id: id.into(),
        name: local.name.clone().unwrap_or_else(|| "Local model".to_string()),
        backend: BackendKind::LocalAccelerated,
        dimension: engine.dim(),
        cost_per_token: 0.0,
        max_batch_size: local.max_batch_size.unwrap_or(DEFAULT_LOCAL_MAX_BATCH),
    };

    registry.register(descriptor, Arc::new(LocalProvider::new(engine)))?;

    Ok(())
}

async fn populate_ollama(
    registry: &ProviderRegistry,
    config: &Config,
) -> Result<(), PopulateError> {
    use crate::providers::EmbeddingProvider;

    let ollama = &config.providers.ollama;

    if ollama.activate == ActivationPolicy::Disabled {
        debug!("ollama provider disabled, skipping");
        return Ok(());
    }

    let model = ollama.model.as_deref().unwrap_or(DEFAULT_OLLAMA_MODEL);
    let provider = match &ollama.api_base {
        Some(api_base) => OllamaProvider::with_api_base(api_base.as_str(), model)
            .map_err(PopulateError::InvalidProvider)?,
        None => OllamaProvider::new(model),
    };

    // Under `auto`, a server that does not answer the tags probe is
    // treated as absent rather than faulty.
    if ollama.activate == ActivationPolicy::Auto {
        if let Err(err) = provider.healthcheck().await {
            info!(error = %err, "ollama server not reachable, skipping");
            return Ok(());
        }
    }

    let descriptor = ProviderDescriptor {
        id: "ollama".into(),
        name: format!("Ollama ({model})"),
        backend: BackendKind::LocalServer,
        dimension: ollama.dimension.unwrap_or(DEFAULT_OLLAMA_DIMENSION),
        cost_per_token: 0.0,
        max_batch_size: ollama.max_batch_size.unwrap_or(DEFAULT_OLLAMA_MAX_BATCH),
    };

    registry.register(descriptor, Arc::new(provider))?;

    Ok(())
}

fn populate_openai(registry: &ProviderRegistry, config: &Config) -> Result<(), PopulateError> {
    let openai = &config.providers.openai;

    if openai.activate == ActivationPolicy::Disabled {
        debug!("openai provider disabled, skipping");
        return Ok(());
    }

    let api_key = openai
        .api_key
        .clone()
        .or_else(|| env::var(OPENAI_KEY_VAR).ok());

    let api_key = match api_key {
        Some(key) => key,
        None if openai.activate == ActivationPolicy::Enabled => {
            return Err(PopulateError::MissingOpenAIKey);
        }
        None => {
            debug!("no openai API key found, skipping");
            return Ok(());
        }
    };

    let model = openai.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL);
    let provider = match &openai.api_base {
        Some(api_base) => OpenAIProvider::new(&api_key, api_base.as_str(), model)
            .map_err(PopulateError::InvalidProvider)?,
        None => OpenAIProvider::with_api_key(&api_key, model),
    };

    let descriptor = ProviderDescriptor {
        id: "openai".into(),
        name: format!("OpenAI ({model})"),
        backend: BackendKind::CloudApi,
        dimension: openai.dimension.unwrap_or(DEFAULT_OPENAI_DIMENSION),
        cost_per_token: openai
            .cost_per_token
            .unwrap_or(DEFAULT_OPENAI_COST_PER_TOKEN),
        max_batch_size: openai.max_batch_size.unwrap_or(DEFAULT_OPENAI_MAX_BATCH),
    };

    registry.register(descriptor, Arc::new(provider))?;

    Ok(())
}
