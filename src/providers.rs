//! Traits and type definitions for embedding backends and provider interactions.
//!
//! The `providers` module contains the components shared by every embedding
//! backend. The interface for all backends is provided by the
//! [`EmbeddingProvider`] trait, which is a general interface for turning a
//! batch of texts into vectors and for probing whether the backend is
//! reachable.
//!
//! ## Embedding Providers
//!
//! Each backend (e.g., a cloud embeddings API, a local inference server, or
//! an in-process accelerated model) must implement the [`EmbeddingProvider`]
//! trait to be usable by the registry. Providers must support two essential
//! operations:
//! - Embed: take a batch of texts and return one vector per text, along with
//!   any usage metadata the backend reports.
//! - Healthcheck: a lightweight probe answering whether the backend is
//!   currently reachable, used by the registry's periodic health tick.
//!
//! What a provider does internally to produce vectors is deliberately opaque:
//! the registry depends only on this trait.
//!
//! ## Error Handling
//!
//! Each API has its own bespoke error system with varying levels of rigor.
//! Per-backend errors are encapsulated in [`Error`], and the [`ErrorKind`]
//! enum provides a closed classification of the failure. Every error also
//! carries a `retryable` flag: the kind describes what went wrong, the flag
//! decides whether the retry loop may attempt the same provider again. The
//! two are kept separate because the same kind can be produced with either
//! polarity (a 503 is a retryable `ProviderUnavailable`; an open circuit
//! breaker is a fail-fast `ProviderUnavailable`).

mod apireq;
mod local;
mod ollama;
mod openai;

pub use local::{EmbedEngine, LocalProvider};
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// This is a list specifying general categories of errors that can be
/// surfaced by an [`EmbeddingProvider`] or by the resilience layer wrapped
/// around it. The taxonomy is closed: every failure crossing the crate
/// boundary is one of these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Failed to reach the underlying backend. This covers DNS
    /// resolution, connectivity issues, and transport resets.
    Network,
    /// A request or the enclosing logical call timed out.
    Timeout,
    /// A rate limit was reached or a quota was exceeded. May carry a
    /// server-suggested delay taken from a rate-limit header.
    RateLimited,
    /// An API key was missing, invalid, or lacks the required
    /// permissions. Retrying cannot help.
    Auth,
    /// The request was malformed or otherwise improper. This
    /// corresponds to 4xx statuses other than 401/403/429, and to
    /// locally rejected inputs such as an empty batch.
    InvalidInput,
    /// The backend is known or presumed to be unable to serve the call.
    /// Produced for 5xx statuses and by an open circuit breaker.
    ProviderUnavailable,
    /// The host lacks the disk or memory headroom to run the operation.
    /// Raised before any network call is attempted.
    ResourceExhausted,
    /// An error that does not fit into any of the other categories,
    /// including responses that violate the client's assumptions.
    Unknown,
}

impl ErrorKind {
    /// The default retry polarity for this kind. Constructors may
    /// override it; see [`Error::retryable`].
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimited
        )
    }
}

/// A classified provider failure.
///
/// Wraps the backend's own error (when there is one) together with the
/// [`ErrorKind`] classification, the retry flag, and an optional
/// server-suggested retry delay.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    retryable: bool,
    retry_after: Option<Duration>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn from_kind(kind: ErrorKind) -> Error {
        Error {
            kind,
            retryable: kind.default_retryable(),
            retry_after: None,
            source: None,
        }
    }

    pub fn from_source(kind: ErrorKind, source: Box<dyn StdError + Send + Sync>) -> Error {
        Error {
            kind,
            retryable: kind.default_retryable(),
            retry_after: None,
            source: Some(source),
        }
    }

    /// Override the retry flag. Used where the kind's default polarity
    /// is wrong, e.g. a retryable 5xx `ProviderUnavailable`.
    pub fn with_retryable(mut self, retryable: bool) -> Error {
        self.retryable = retryable;
        self
    }

    /// Attach a server-suggested retry delay (rate-limit headers).
    pub fn with_retry_after(mut self, delay: Option<Duration>) -> Error {
        self.retry_after = delay;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Whether the retry loop may attempt the same provider again.
    pub fn retryable(&self) -> bool {
        self.retryable
    }

    /// The delay suggested by the backend, if it supplied one.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    fn message(&self) -> &'static str {
        match self.kind {
            ErrorKind::Network => "failed to reach the backend",
            ErrorKind::Timeout => "the request timed out",
            ErrorKind::RateLimited => "rate limit exceeded or quota crossed",
            ErrorKind::Auth => "authentication failed or not provided",
            ErrorKind::InvalidInput => "the request was bad or malformed",
            ErrorKind::ProviderUnavailable => "the provider is unavailable",
            ErrorKind::ResourceExhausted => "insufficient disk or memory headroom",
            ErrorKind::Unknown => "an unspecified error occurred",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.message(), source),
            None => write!(f, "{}", self.message()),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|e| &**e as _)
    }
}

/// A unique per-provider identifier, chosen at registration time
/// (e.g., `"minilm"` or `"text-embed-large"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new<S: Into<String>>(id: S) -> ProviderId {
        ProviderId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        ProviderId::new(value)
    }
}

/// The class of backend serving a provider.
///
/// The `to_string` and `FromStr` forms appear in configuration files and
/// should remain stable.
#[derive(
    Debug,
    PartialEq,
    Eq,
    Hash,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// A remote, metered embeddings API.
    CloudApi,
    /// An inference server running on this host or the local network.
    LocalServer,
    /// An in-process model running on local (possibly accelerated)
    /// hardware.
    LocalAccelerated,
}

impl BackendKind {
    /// Whether this backend consumes resources on the local host.
    pub fn is_local(self) -> bool {
        matches!(
            self,
            BackendKind::LocalServer | BackendKind::LocalAccelerated
        )
    }
}

/// The immutable identity and declared limits of a provider. Fixed at
/// registration; the registry never mutates a descriptor.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    /// Registry-unique identifier.
    pub id: ProviderId,
    /// Human-readable name for status displays.
    pub name: String,
    /// The class of backend serving this provider.
    pub backend: BackendKind,
    /// Declared vector dimensionality. Responses are checked against it.
    pub dimension: usize,
    /// Cost per input token in dollars. Zero for local backends.
    pub cost_per_token: f64,
    /// The largest batch the backend accepts in one call.
    pub max_batch_size: usize,
}

impl ProviderDescriptor {
    /// Whether calls to this provider carry no per-token cost.
    pub fn is_free(&self) -> bool {
        self.cost_per_token == 0.0
    }
}

/// Token usage metadata for a single embed call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    /// The number of input tokens the backend reports having consumed,
    /// or `None` if the backend does not report usage.
    pub tokens: Option<u64>,
}

/// The result of a successful embed call.
#[derive(Debug)]
pub struct EmbedResponse {
    /// One vector per input text, in input order.
    pub vectors: Vec<Vec<f32>>,
    /// Usage metadata, when the backend reports it.
    pub usage: Usage,
}

/// A trait implemented by all embedding backends.
///
/// Implementations are black boxes: they either return one vector per
/// input text or fail with a classified [`Error`]. The registry layers
/// breaker gating, retry, and statistics on top; adapters must not
/// retry internally.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// The class of backend behind this provider.
    fn backend(&self) -> BackendKind;

    /// Embed a batch of texts, returning one vector per text in input
    /// order.
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, Error>;

    /// A lightweight reachability probe. Must not perform significant
    /// work on the backend.
    async fn healthcheck(&self) -> Result<(), Error>;
}
