use reqwest::{Client, IntoUrl, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::providers::apireq::{self, parse_retry_after, Url};

const DEFAULT_API_BASE: &'static str = "https://api.openai.com";

#[derive(thiserror::Error, Debug)]
pub(super) enum Error {
    /// The API Base is not a URL that can be used in a network request
    #[error("invalid api base")]
    InvalidApiBase(#[source] reqwest::Error),

    /// Endpoint URL is invalid
    #[error("invalid endpoint")]
    InvalidEndpoint(
        #[from]
        #[source]
        url::ParseError,
    ),

    /// Some issue with the request
    #[error("{}", .0)]
    RequestFailed(
        #[from]
        #[source]
        apireq::ReqwestError,
    ),

    /// The API answered with a non-success status. The payload message
    /// is kept verbatim; `retry_after` holds the rate-limit header's
    /// suggestion when the server sent one.
    #[error("the API returned {status}: {message}")]
    Status {
        status: StatusCode,
        retry_after: Option<Duration>,
        message: String,
    },

    /// The response did not contain one vector per input.
    #[error("the API returned {returned} vectors for {requested} inputs")]
    VectorCountMismatch { returned: usize, requested: usize },
}

/* Structures to serialize /v1/embeddings */

#[derive(Serialize, Debug)]
struct EmbeddingsRequest<'r> {
    model: &'r str,
    input: &'r [String],
}

/* Structures to deseralize /v1/embeddings */

#[derive(Deserialize, Debug)]
pub(super) struct EmbeddingObject {
    pub index: usize,
    pub embedding: Vec<f32>,
}

#[derive(Deserialize, Debug)]
pub(super) struct Usage {
    pub prompt_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Deserialize, Debug)]
pub(super) struct EmbeddingsResponse {
    pub data: Vec<EmbeddingObject>,
    pub usage: Usage,
}

/* API Errors */

#[derive(Deserialize, Debug)]
struct ApiErrorPayload {
    message: String,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    error: ApiErrorPayload,
}

pub(super) struct OpenAIApi {
    api_base: Url,
    api_key: String,
    client: Client,
}

impl OpenAIApi {
    pub(super) fn new<U: IntoUrl>(api_key: &str, api_base: U) -> Result<OpenAIApi, Error> {
        let api_base = api_base.into_url().map_err(Error::InvalidApiBase)?;

        Ok(OpenAIApi {
            api_base,
            api_key: api_key.to_string(),
            client: Client::new(),
        })
    }

    pub(super) fn with_api_key(api_key: &str) -> OpenAIApi {
        Self::new(api_key, DEFAULT_API_BASE)
            .unwrap_or_else(|_| panic!("the default API base must parse"))
    }

    async fn maybe_parse_api_error(res: reqwest::Response) -> Result<reqwest::Response, Error> {
        let status = res.status();

        if status.is_success() {
            return Ok(res);
        }

        let retry_after = parse_retry_after(res.headers());

        // The error body is best-effort: a gateway may answer with
        // something that is not the documented JSON envelope.
        let message = match res.json::<ApiErrorResponse>().await {
            Ok(body) => body.error.message,
            Err(_) => format!("no parsable error payload ({})", status),
        };

        Err(Error::Status {
            status,
            retry_after,
            message,
        })
    }

    pub(super) async fn embeddings(
        &self,
        model: &str,
        input: &[String],
    ) -> Result<EmbeddingsResponse, Error> {
        let url = self.api_base.join("/v1/embeddings")?;

        let res = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingsRequest { model, input })
            .send()
            .await
            .map_err(|e| Error::RequestFailed(e.into()))?;

        let res = Self::maybe_parse_api_error(res).await?;

        let mut body: EmbeddingsResponse = res
            .json()
            .await
            .map_err(|e| Error::RequestFailed(e.into()))?;

        if body.data.len() != input.len() {
            return Err(Error::VectorCountMismatch {
                returned: body.data.len(),
                requested: input.len(),
            });
        }

        // The API documents input order but attaches indices; honor them.
        body.data.sort_by_key(|obj| obj.index);

        Ok(body)
    }

    /// A cheap reachability and credential probe.
    pub(super) async fn models(&self) -> Result<(), Error> {
        let url = self.api_base.join("/v1/models")?;

        let res = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| Error::RequestFailed(e.into()))?;

        Self::maybe_parse_api_error(res).await?;

        Ok(())
    }
}
