//! The registry owns the set of known embedding providers.
//!
//! Each registered provider pairs an immutable descriptor (identity,
//! backend kind, declared dimensionality, cost, batch limit) with live
//! state: rolling statistics, a health flag maintained by a periodic
//! probe tick, and a circuit breaker. `embed_batch` is the only path
//! that reaches a provider's SDK, and it layers the full resilience
//! pipeline around the call: resource validation, breaker gating, and
//! retry under the backoff policy.
//!
//! The registry is an explicitly constructed service instance, shared
//! by reference; nothing here is a process-global. Tests build isolated
//! registries with injected providers and samplers.

mod populate;
mod registry;

pub use populate::{populated_registry, PopulateError};
pub use registry::{
    ProviderInfo, ProviderRegistry, ProviderStats, RegistryError,
};
