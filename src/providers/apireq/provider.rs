//! Conversions between transport-level errors, HTTP statuses, and the
//! provider error taxonomy.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use std::time::Duration;

use crate::providers::apireq::{error::ErrorKind as ReqwestErrorKind, ReqwestError};
use crate::providers::{Error, ErrorKind};

impl From<ReqwestError> for Error {
    fn from(value: ReqwestError) -> Self {
        let kind = match value.kind() {
            ReqwestErrorKind::ConnectFailed => ErrorKind::Network,
            ReqwestErrorKind::TimedOut => ErrorKind::Timeout,
            ReqwestErrorKind::DecodingFailed => ErrorKind::Unknown,
            ReqwestErrorKind::Other => ErrorKind::Network,
        };

        Error::from_source(kind, Box::new(value))
    }
}

/// Classify an HTTP status into an error kind and retry flag.
///
/// The mapping is fixed across backends: 429 is a retryable rate limit,
/// 401/403 are fatal auth failures, any other 4xx is a fatal input
/// problem, and 5xx are retryable server-side failures.
pub(crate) fn classify_status(status: StatusCode) -> (ErrorKind, bool) {
    match status.as_u16() {
        429 => (ErrorKind::RateLimited, true),
        401 | 403 => (ErrorKind::Auth, false),
        400..=499 => (ErrorKind::InvalidInput, false),
        500..=599 => (ErrorKind::ProviderUnavailable, true),
        _ => (ErrorKind::Unknown, false),
    }
}

/// Extract a delay from a `Retry-After` header, when present and given
/// in seconds. HTTP-date forms are ignored; the backoff policy supplies
/// its default in that case.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?;
    let seconds: u64 = value.to_str().ok()?.trim().parse().ok()?;

    Some(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn transport_errors_map_into_the_taxonomy() {
        let transport: ReqwestError = reqwest::Client::new()
            .get("no-scheme")
            .build()
            .expect_err("relative urls are rejected")
            .into();
        let err: Error = transport.into();

        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.retryable());
    }

    #[test]
    fn statuses_classify_per_taxonomy() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            (ErrorKind::RateLimited, true)
        );
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            (ErrorKind::Auth, false)
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN),
            (ErrorKind::Auth, false)
        );
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST),
            (ErrorKind::InvalidInput, false)
        );
        assert_eq!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY),
            (ErrorKind::InvalidInput, false)
        );
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            (ErrorKind::ProviderUnavailable, true)
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            (ErrorKind::ProviderUnavailable, true)
        );
    }

    #[test]
    fn retry_after_seconds_are_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));

        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));
    }

    #[test]
    fn retry_after_dates_fall_back_to_policy() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );

        assert_eq!(parse_retry_after(&headers), None);
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }
}
