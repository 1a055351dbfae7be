use async_trait::async_trait;
use reqwest::IntoUrl;

use crate::providers::apireq::classify_status;
use crate::providers::openai::api;
use crate::providers::{
    BackendKind, EmbedResponse, EmbeddingProvider, Error, ErrorKind, Usage,
};

impl From<api::Error> for Error {
    fn from(value: api::Error) -> Self {
        match value {
            api::Error::RequestFailed(err) => err.into(),
            api::Error::Status {
                status,
                retry_after,
                message,
            } => {
                let (kind, retryable) = classify_status(status);

                Error::from_source(
                    kind,
                    Box::new(api::Error::Status {
                        status,
                        retry_after,
                        message,
                    }),
                )
                .with_retryable(retryable)
                .with_retry_after(retry_after)
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

/// Adapter for the OpenAI embeddings API (or any service exposing the
/// same wire format behind a different base URL).
pub struct OpenAIProvider {
    api: api::OpenAIApi,
    model: String,
}

impl OpenAIProvider {
    pub fn new<U: IntoUrl>(
        api_key: &str,
        api_base: U,
        model: &str,
    ) -> Result<OpenAIProvider, Error> {
        Ok(OpenAIProvider {
            api: api::OpenAIApi::new(api_key, api_base)?,
            model: model.to_string(),
        })
    }

    pub fn with_api_key(api_key: &str, model: &str) -> OpenAIProvider {
        OpenAIProvider {
            api: api::OpenAIApi::with_api_key(api_key),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn backend(&self) -> BackendKind {
        BackendKind::CloudApi
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, Error> {
        let body = self.api.embeddings(&self.model, texts).await?;

        let vectors = body.data.into_iter().map(|obj| obj.embedding).collect();
        let tokens = if body.usage.total_tokens > 0 {
            Some(body.usage.total_tokens)
        } else {
            Some(body.usage.prompt_tokens)
        };

        Ok(EmbedResponse {
            vectors,
            usage: Usage { tokens },
        })
    }

    async fn healthcheck(&self) -> Result<(), Error> {
        self.api.models().await.map_err(Into::into)
    }
}
