use reqwest::{Client, IntoUrl, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::providers::apireq::{self, Url};

const OLLAMA_DEFAULT_ENDPOINT: &'static str = "http://localhost:11434";

#[derive(Debug, Error)]
pub(super) enum Error {
    #[error("invalid ollama api base: {0}")]
    InvalidApiBase(reqwest::Error),

    #[error("invalid ollama endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("a request to ollama failed: {0}")]
    RequestFailed(#[from] apireq::ReqwestError),

    #[error("the ollama api answered {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("ollama returned {returned} vectors for {requested} inputs")]
    VectorCountMismatch { returned: usize, requested: usize },
}

/* === IO === */

// Structures to serialize /api/embed
#[derive(Serialize, Debug)]
struct EmbedRequest<'r> {
    model: &'r str,
    input: &'r [String],
}

// Structures to deseralize /api/embed
#[derive(Deserialize, Debug)]
pub(super) struct EmbedResponseBody {
    pub embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
}

// Structures to deseralize /api/tags

#[derive(Debug, Deserialize)]
struct TagsList {
    #[allow(dead_code)]
    models: Vec<serde_json::Value>,
}

// Errors
#[derive(Debug, Deserialize)]
struct ApiError {
    error: String,
}

pub(super) struct OllamaApi {
    api_base: Url,
    client: Client,
}

impl OllamaApi {
    pub(super) fn with_api_base<U: IntoUrl>(api_base: U) -> Result<OllamaApi, Error> {
        Ok(OllamaApi {
            api_base: api_base.into_url().map_err(Error::InvalidApiBase)?,
            client: Client::new(),
        })
    }

    pub(super) fn new() -> OllamaApi {
        Self::with_api_base(OLLAMA_DEFAULT_ENDPOINT)
            .unwrap_or_else(|_| panic!("the default endpoint must parse"))
    }

    async fn maybe_parse_api_error(res: Response) -> Result<Response, Error> {
        let status = res.status();

        if status.is_success() {
            return Ok(res);
        }

        let message = match res.json::<ApiError>().await {
            Ok(err) => err.error,
            Err(_) => format!("no parsable error payload ({})", status),
        };

        Err(Error::Status { status, message })
    }

    /// List installed models. Doubles as the "is ollama awake" probe.
    pub(super) async fn tags(&self) -> Result<(), Error> {
        let url = self.api_base.join("/api/tags")?;

        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::RequestFailed(e.into()))?;

        let res = Self::maybe_parse_api_error(res).await?;

        let _tags: TagsList = res
            .json()
            .await
            .map_err(|e| Error::RequestFailed(e.into()))?;

        Ok(())
    }

    pub(super) async fn embed(
        &self,
        model: &str,
        input: &[String],
    ) -> Result<EmbedResponseBody, Error> {
        let url = self.api_base.join("/api/embed")?;

        let res = self
            .client
            .post(url)
            .json(&EmbedRequest { model, input })
            .send()
            .await
            .map_err(|e| Error::RequestFailed(e.into()))?;

        let res = Self::maybe_parse_api_error(res).await?;

        let body: EmbedResponseBody = res
            .json()
            .await
            .map_err(|e| Error::RequestFailed(e.into()))?;

        if body.embeddings.len() != input.len() {
            return Err(Error::VectorCountMismatch {
                returned: body.embeddings.len(),
                requested: input.len(),
            });
        }

        Ok(body)
    }
}
