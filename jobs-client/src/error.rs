use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    RequestFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} {url} failed: {status}; body={body}")]
    Status {
        method: &'static str,
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("decode error for {url}: {source}; body={body}")]
    Decode {
        url: String,
        body: String,
        #[source]
        source: serde_json::Error,
    },

    /// The scheduler answered with an `error` field.
    #[error("{0}")]
    Application(String),

    #[error("job id must not be empty")]
    InvalidJobId,

    #[error("response from {url} has no `{field}` field")]
    MissingField { url: String, field: &'static str },
}
