//! An umbrella module for the Ollama embeddings provider

mod api;
mod provider;

pub use self::provider::OllamaProvider;
