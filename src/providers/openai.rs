//! An umbrella module for the OpenAI embeddings provider

mod api;
mod provider;

pub use self::provider::OpenAIProvider;
