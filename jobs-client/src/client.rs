use std::sync::Arc;

use kala_session::AccessTokenSource;
use reqwest::Method;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use reqwest::header::USER_AGENT;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::error::ApiError;
use crate::types::CreatedEnvelope;
use crate::types::Job;
use crate::types::JobEnvelope;
use crate::types::JobId;
use crate::types::JobListing;
use crate::types::Stats;
use crate::types::StatsEnvelope;

const API_PREFIX: &str = "api/v1";

/// Authenticated client for the scheduler's `/api/v1/` REST API.
///
/// `get_job` and `create_job` report failures to the caller. Every other
/// operation is fire-and-forget: failures are logged and surface as `None`
/// (or nothing), matching the command style of the web UI this client
/// replaces.
#[derive(Clone)]
pub struct JobsClient {
    api_base: String,
    http: reqwest::Client,
    tokens: Arc<dyn AccessTokenSource>,
}

impl JobsClient {
    pub fn new(origin: impl Into<String>, tokens: Arc<dyn AccessTokenSource>) -> Self {
        let mut origin = origin.into();
        while origin.ends_with('/') {
            origin.pop();
        }
        Self {
            api_base: format!("{origin}/{API_PREFIX}"),
            http: reqwest::Client::new(),
            tokens,
        }
    }

    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// `<origin>/api/v1`, without a trailing slash.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn job_url(&self, suffix: &str) -> String {
        format!("{}/job/{suffix}", self.api_base)
    }

    fn headers(&self) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("kala-jobs-client/", env!("CARGO_PKG_VERSION"))),
        );
        match self.tokens.access_token() {
            Ok(token) => match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(value) => {
                    h.insert(AUTHORIZATION, value);
                }
                Err(_) => {
                    warn!("access token is not a valid header value; sending request without it");
                }
            },
            Err(err) => warn!(error = %err, "sending request without an access token"),
        }
        h
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http.request(method, url).headers(self.headers())
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response, ApiError> {
        debug!(url, "sending request");
        request
            .send()
            .await
            .map_err(|source| ApiError::RequestFailed {
                url: url.to_string(),
                source,
            })
    }

    async fn read_body(response: Response, url: &str) -> Result<(StatusCode, String), ApiError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| ApiError::RequestFailed {
                url: url.to_string(),
                source,
            })?;
        Ok((status, body))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let response = self.send(self.request(Method::GET, url), url).await?;
        let (status, body) = Self::read_body(response, url).await?;
        decode_response("GET", url, status, body)
    }

    /// Fire-and-forget request: outcome is only logged.
    async fn command(&self, method: Method, url: String, action: &str) {
        match self.send(self.request(method.clone(), &url), &url).await {
            Ok(response) if response.status().is_success() => {
                debug!(%method, url = %url, "{action} succeeded");
            }
            Ok(response) => {
                warn!(
                    %method,
                    url = %url,
                    status = %response.status(),
                    "{action} returned an error status"
                );
            }
            Err(err) => error!(error = %err, "{action} failed"),
        }
    }

    pub async fn list_jobs(&self) -> Option<JobListing> {
        let url = self.job_url("");
        match self.get_json(&url).await {
            Ok(listing) => Some(listing),
            Err(err) => {
                error!(error = %err, "parsing jobs failed");
                None
            }
        }
    }

    /// Fetches one job. Fails on transport errors, undecodable bodies and
    /// bodies carrying an `error` field.
    pub async fn get_job(&self, id: &JobId) -> Result<Job, ApiError> {
        let url = self.job_url(&format!("{}/", id.path_segment()));
        let result = self.fetch_job(&url).await;
        if let Err(err) = &result {
            error!(error = %err, job_id = %id, "parsing job failed");
        }
        result
    }

    async fn fetch_job(&self, url: &str) -> Result<Job, ApiError> {
        let response = self.send(self.request(Method::GET, url), url).await?;
        let (status, body) = Self::read_body(response, url).await?;
        let envelope: JobEnvelope = decode_response("GET", url, status, body)?;
        if let Some(message) = envelope.error {
            return Err(ApiError::Application(message));
        }
        envelope.job.ok_or_else(|| ApiError::MissingField {
            url: url.to_string(),
            field: "job",
        })
    }

    pub async fn enable_job(&self, id: &JobId) {
        let url = self.job_url(&format!("enable/{}/", id.path_segment()));
        self.command(Method::POST, url, "enabling job").await;
    }

    pub async fn disable_job(&self, id: &JobId) {
        let url = self.job_url(&format!("disable/{}/", id.path_segment()));
        self.command(Method::POST, url, "disabling job").await;
    }

    pub async fn run_job(&self, id: &JobId) {
        let url = self.job_url(&format!("start/{}/", id.path_segment()));
        self.command(Method::POST, url, "starting job").await;
    }

    pub async fn delete_job(&self, id: &JobId) {
        let url = self.job_url(&format!("{}/", id.path_segment()));
        self.command(Method::DELETE, url, "deleting job").await;
    }

    /// Creates a job from `definition` and returns the id the scheduler
    /// assigned to it.
    pub async fn create_job<T>(&self, definition: &T) -> Result<JobId, ApiError>
    where
        T: Serialize + ?Sized,
    {
        let url = self.job_url("");
        let result = self.post_job(&url, definition).await;
        if let Err(err) = &result {
            error!(error = %err, "creating job failed");
        }
        result
    }

    async fn post_job<T>(&self, url: &str, definition: &T) -> Result<JobId, ApiError>
    where
        T: Serialize + ?Sized,
    {
        let request = self.request(Method::POST, url).json(definition);
        let response = self.send(request, url).await?;
        let (status, body) = Self::read_body(response, url).await?;
        let envelope: CreatedEnvelope = decode_response("POST", url, status, body)?;
        if let Some(message) = envelope.error {
            return Err(ApiError::Application(message));
        }
        envelope.id.ok_or_else(|| ApiError::MissingField {
            url: url.to_string(),
            field: "id",
        })
    }

    /// Raw response of `GET job/stats/<id>/`, whatever its status.
    pub async fn job_stats(&self, id: &JobId) -> Option<Response> {
        let url = self.job_url(&format!("stats/{}/", id.path_segment()));
        match self.send(self.request(Method::GET, &url), &url).await {
            Ok(response) => Some(response),
            Err(err) => {
                error!(error = %err, job_id = %id, "getting job stats failed");
                None
            }
        }
    }

    /// The `Stats` object of `GET stats/`.
    pub async fn metrics(&self) -> Option<Stats> {
        let url = format!("{}/stats/", self.api_base);
        match self.get_json::<StatsEnvelope>(&url).await {
            Ok(StatsEnvelope { stats: Some(stats) }) => Some(stats),
            Ok(StatsEnvelope { stats: None }) => {
                warn!(url = %url, "metrics response has no `Stats` field");
                None
            }
            Err(err) => {
                error!(error = %err, "getting metrics failed");
                None
            }
        }
    }
}

/// Decodes `body` whatever the status; an undecodable non-2xx body is
/// reported as [`ApiError::Status`].
fn decode_response<T: DeserializeOwned>(
    method: &'static str,
    url: &str,
    status: StatusCode,
    body: String,
) -> Result<T, ApiError> {
    match serde_json::from_str(&body) {
        Ok(value) => Ok(value),
        Err(_) if !status.is_success() => Err(ApiError::Status {
            method,
            url: url.to_string(),
            status,
            body,
        }),
        Err(source) => Err(ApiError::Decode {
            url: url.to_string(),
            body,
            source,
        }),
    }
}
