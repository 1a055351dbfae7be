use async_trait::async_trait;
use reqwest::IntoUrl;

use crate::providers::apireq::classify_status;
use crate::providers::ollama::api;
use crate::providers::{
    BackendKind, EmbedResponse, EmbeddingProvider, Error, ErrorKind, Usage,
};

impl From<api::Error> for Error {
    fn from(value: api::Error) -> Self {
        match value {
            api::Error::RequestFailed(err) => err.into(),
            api::Error::Status { status, message } => {
                let (kind, retryable) = classify_status(status);

                Error::from_source(kind, Box::new(api::Error::Status { status, message }))
                    .with_retryable(retryable)
            }
            value @ (api::Error::InvalidApiBase(_) | api::Error::InvalidEndpoint(_)) => {
                Error::from_source(ErrorKind::Network, Box::new(value)).with_retryable(false)
            }
            value @ api::Error::VectorCountMismatch { .. } => {
                Error::from_source(ErrorKind::Unknown, Box::new(value))
            }
        }
    }
}

/// Adapter for an Ollama inference server on this host or the local
/// network.
pub struct OllamaProvider {
    api: api::OllamaApi,
    model: String,
}

impl OllamaProvider {
    pub fn with_api_base<U: IntoUrl>(
        api_base: U,
        model: &str,
    ) -> Result<OllamaProvider, Error> {
        Ok(OllamaProvider {
            api: api::OllamaApi::with_api_base(api_base)?,
            model: model.to_string(),
        })
    }

    pub fn new(model: &str) -> OllamaProvider {
        OllamaProvider {
            api: api::OllamaApi::new(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn backend(&self) -> BackendKind {
        BackendKind::LocalServer
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, Error> {
        let body = self.api.embed(&self.model, texts).await?;

        Ok(EmbedResponse {
            vectors: body.embeddings,
            usage: Usage {
                tokens: body.prompt_eval_count,
            },
        })
    }

    async fn healthcheck(&self) -> Result<(), Error> {
        self.api.tags().await.map_err(Into::into)
    }
}
