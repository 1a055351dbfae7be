//! Shared plumbing for the HTTP-backed adapters: transport error
//! classification, status mapping, and rate-limit header parsing.

mod error;
mod provider;

pub(crate) use error::Error as ReqwestError;
pub(crate) use provider::{classify_status, parse_retry_after};
pub(crate) use reqwest::Url;
