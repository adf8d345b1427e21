//! [`IdentityProvider`] backed by an OpenID-Connect issuer, using the
//! authorization-code flow with PKCE.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use chrono::Utc;
use serde::Deserialize;
use tracing::debug;
use tracing::warn;
use url::Url;

use crate::config::AuthConfig;
use crate::config::ConfigError;
use crate::error::AuthError;
use crate::error::Result;
use crate::pkce::PkceCodes;
use crate::pkce::random_token;
use crate::provider::IdentityProvider;
use crate::redirect::RedirectParams;
use crate::token_data::AccessToken;
use crate::token_data::IdToken;
use crate::token_data::Tokens;
use crate::token_store::TokenStore;

/// Transaction created by [`IdentityProvider::begin_redirect`] and consumed by
/// the matching callback.
#[derive(Debug, Clone)]
struct PendingAuthorization {
    state: String,
    nonce: String,
    code_verifier: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

pub struct OidcProvider {
    config: AuthConfig,
    authorize_url: Url,
    token_url: Url,
    http: reqwest::Client,
    store: Arc<dyn TokenStore>,
    pending: Mutex<Option<PendingAuthorization>>,
}

impl OidcProvider {
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn TokenStore>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let authorize_url = config.authorize_endpoint()?;
        let token_url = config.token_endpoint()?;
        Ok(Self {
            config,
            authorize_url,
            token_url,
            http: reqwest::Client::new(),
            store,
            pending: Mutex::new(None),
        })
    }

    /// Use a custom HTTP client (connection pool reuse, timeouts, tests).
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    fn take_pending(&self) -> Option<PendingAuthorization> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn request_tokens(&self, code: &str, pending: &PendingAuthorization) -> Result<Tokens> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", pending.code_verifier.as_str()),
        ];

        debug!(token_url = %self.token_url, "exchanging authorization code");
        let response = self
            .http
            .post(self.token_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(match serde_json::from_str::<OAuthErrorResponse>(&body) {
                Ok(err) => AuthError::from_oauth(&err.error, err.error_description.as_deref()),
                Err(_) => {
                    AuthError::ExchangeFailed(format!("token endpoint returned {status}: {body}"))
                }
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthError::ExchangeFailed(format!("invalid token response: {e}")))?;
        self.tokens_from_response(parsed, &pending.nonce)
    }

    fn tokens_from_response(&self, response: TokenResponse, nonce: &str) -> Result<Tokens> {
        let mut access_token = AccessToken::new(response.access_token);
        if let Some(expires_in) = response.expires_in {
            access_token = access_token
                .expiring_in(Utc::now(), expires_in)
                .ok_or_else(|| {
                    AuthError::ExchangeFailed(format!("`expires_in` out of range: {expires_in}"))
                })?;
        }
        let id_token = response
            .id_token
            .map(IdToken::parse)
            .transpose()
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let nonce_matches = id_token
            .as_ref()
            .is_none_or(|token| token.claims().nonce.as_deref() == Some(nonce));
        if !nonce_matches {
            return Err(AuthError::InvalidToken(
                "ID token nonce does not match the authorization request".to_string(),
            ));
        }
        let scopes = match response.scope {
            Some(scope) => scope.split_whitespace().map(str::to_string).collect(),
            None => self.config.scopes.as_slice().to_vec(),
        };
        Ok(Tokens {
            access_token,
            id_token,
            refresh_token: response.refresh_token,
            scopes,
        })
    }
}

#[async_trait::async_trait]
impl IdentityProvider for OidcProvider {
    fn begin_redirect(&self, params: &RedirectParams) -> Result<Url> {
        let pkce = PkceCodes::generate();
        let state = params
            .get("state")
            .map(str::to_string)
            .unwrap_or_else(random_token::<16>);
        let nonce = random_token::<16>();
        let scope = self.config.scopes.to_string();

        let mut url = self.authorize_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", self.config.redirect_uri.as_str())
                .append_pair("response_type", "code")
                .append_pair("response_mode", "query")
                .append_pair("scope", &scope)
                .append_pair("state", &state)
                .append_pair("nonce", &nonce)
                .append_pair("code_challenge", &pkce.code_challenge)
                .append_pair("code_challenge_method", "S256");
            for (key, value) in params.iter().filter(|(key, _)| *key != "state") {
                query.append_pair(key, value);
            }
        }

        let previous = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(PendingAuthorization {
                state,
                nonce,
                code_verifier: pkce.code_verifier,
            });
        if previous.is_some() {
            debug!("replacing an unfinished authorization request");
        }
        Ok(url)
    }

    async fn exchange_code_from_url(&self, location: &Url) -> Result<Tokens> {
        let params: HashMap<String, String> = location.query_pairs().into_owned().collect();
        let pending = self.take_pending().ok_or(AuthError::NoPendingAuthorization)?;
        if params.get("state") != Some(&pending.state) {
            return Err(AuthError::StateMismatch);
        }

        if let Some(error) = params.get("error") {
            return Err(AuthError::from_oauth(
                error,
                params.get("error_description").map(String::as_str),
            ));
        }

        let code = params.get("code").ok_or(AuthError::MissingCode)?;
        self.request_tokens(code, &pending).await
    }

    fn get_tokens(&self) -> Option<Tokens> {
        match self.store.load() {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!(error = %err, "failed to read stored tokens");
                None
            }
        }
    }

    fn set_tokens(&self, tokens: Tokens) -> Result<()> {
        self.store.save(&tokens)?;
        Ok(())
    }

    fn clear_tokens(&self) -> Result<()> {
        self.store.clear()?;
        Ok(())
    }
}
