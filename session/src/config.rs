//! Static identity-provider configuration for a session.

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use url::Url;

const DEFAULT_SCOPES: &str = "openid email";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL for `{field}`: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Where the identity provider's tokens live between "page loads".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStorage {
    /// Persisted for the user's session (a private token file for native
    /// callers).
    #[default]
    #[serde(rename = "sessionStorage")]
    SessionStorage,
    /// Held only in memory; every load has to fetch fresh tokens.
    #[serde(rename = "memory")]
    Memory,
}

impl TokenStorage {
    /// Whether a fresh set of tokens has to be acquired on every load.
    pub fn requires_refresh_per_load(self) -> bool {
        matches!(self, Self::Memory)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowType {
    #[default]
    Redirect,
}

/// Requested OAuth scopes, written as a single space-separated string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Scopes(Vec<String>);

impl Scopes {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.iter().any(|s| s == scope)
    }
}

impl Default for Scopes {
    fn default() -> Self {
        Self::from(DEFAULT_SCOPES)
    }
}

impl From<&str> for Scopes {
    fn from(value: &str) -> Self {
        Self(value.split_whitespace().map(str::to_string).collect())
    }
}

impl From<String> for Scopes {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<Scopes> for String {
    fn from(value: Scopes) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for Scopes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

/// Identity-provider settings for one session controller.
///
/// ```toml
/// issuer = "https://example.okta.com/oauth2/default"
/// client_id = "0oa..."
/// redirect_uri = "http://localhost:8400/callback"
/// scopes = "openid email"
/// storage = "memory"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub issuer: Url,
    pub client_id: String,
    pub redirect_uri: Url,
    /// Canonical application URI restored into the location once a redirect
    /// callback has been consumed. Defaults to `redirect_uri`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_uri: Option<Url>,
    #[serde(default)]
    pub scopes: Scopes,
    #[serde(default)]
    pub storage: TokenStorage,
    #[serde(default)]
    pub flow: FlowType,
    /// Acquire tokens through a silent redirect even when the storage mode
    /// would normally keep them across loads.
    #[serde(default)]
    pub force_get_tokens: bool,
    /// Opaque application state forwarded as the OAuth `state` parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorize_url: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<Url>,
}

impl AuthConfig {
    pub fn new(issuer: Url, client_id: impl Into<String>, redirect_uri: Url) -> Self {
        Self {
            issuer,
            client_id: client_id.into(),
            redirect_uri,
            app_uri: None,
            scopes: Scopes::default(),
            storage: TokenStorage::default(),
            flow: FlowType::default(),
            force_get_tokens: false,
            state: None,
            authorize_url: None,
            token_url: None,
        }
    }

    #[must_use]
    pub fn with_storage(mut self, storage: TokenStorage) -> Self {
        self.storage = storage;
        self
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: impl Into<Scopes>) -> Self {
        self.scopes = scopes.into();
        self
    }

    #[must_use]
    pub fn with_app_uri(mut self, app_uri: Url) -> Self {
        self.app_uri = Some(app_uri);
        self
    }

    #[must_use]
    pub fn with_force_get_tokens(mut self, force: bool) -> Self {
        self.force_get_tokens = force;
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    #[must_use]
    pub fn with_authorize_url(mut self, url: Url) -> Self {
        self.authorize_url = Some(url);
        self
    }

    #[must_use]
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = Some(url);
        self
    }

    pub fn app_uri(&self) -> &Url {
        self.app_uri.as_ref().unwrap_or(&self.redirect_uri)
    }

    /// Authorization endpoint, `<issuer>/v1/authorize` unless overridden.
    pub fn authorize_endpoint(&self) -> Result<Url, ConfigError> {
        match &self.authorize_url {
            Some(url) => Ok(url.clone()),
            None => issuer_endpoint(&self.issuer, "v1/authorize", "authorize_url"),
        }
    }

    /// Token endpoint, `<issuer>/v1/token` unless overridden.
    pub fn token_endpoint(&self) -> Result<Url, ConfigError> {
        match &self.token_url {
            Some(url) => Ok(url.clone()),
            None => issuer_endpoint(&self.issuer, "v1/token", "token_url"),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("`client_id` must not be empty".into()));
        }
        if !self.scopes.contains("openid") {
            return Err(ConfigError::Invalid(format!(
                "`scopes` must include `openid` (got `{}`)",
                self.scopes
            )));
        }
        for (field, url) in [
            ("issuer", &self.issuer),
            ("redirect_uri", &self.redirect_uri),
        ] {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid(format!(
                    "`{field}` must be an http(s) URL (got `{url}`)"
                )));
            }
        }
        self.authorize_endpoint()?;
        self.token_endpoint()?;
        Ok(())
    }
}

fn issuer_endpoint(issuer: &Url, suffix: &str, field: &'static str) -> Result<Url, ConfigError> {
    let base = issuer.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}/{suffix}"))
        .map_err(|source| ConfigError::InvalidUrl { field, source })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> AuthConfig {
        AuthConfig::new(
            "https://idp.example.com/oauth2/default".parse().unwrap(),
            "client-123",
            "http://localhost:8400/callback".parse().unwrap(),
        )
    }

    #[test]
    fn deserializes_browser_style_settings() {
        let parsed: AuthConfig = serde_json::from_value(serde_json::json!({
            "issuer": "https://idp.example.com/oauth2/default",
            "client_id": "client-123",
            "redirect_uri": "http://localhost:8400/callback",
            "scopes": "openid   email profile",
            "storage": "memory",
            "flow": "redirect",
        }))
        .unwrap();

        assert_eq!(parsed.scopes.as_slice(), ["openid", "email", "profile"]);
        assert_eq!(parsed.storage, TokenStorage::Memory);
        assert_eq!(parsed.flow, FlowType::Redirect);
        assert!(!parsed.force_get_tokens);
    }

    #[test]
    fn storage_defaults_to_session_storage() {
        let parsed: AuthConfig = serde_json::from_value(serde_json::json!({
            "issuer": "https://idp.example.com",
            "client_id": "c",
            "redirect_uri": "http://localhost:8400/",
        }))
        .unwrap();
        assert_eq!(parsed.storage, TokenStorage::SessionStorage);
        assert_eq!(parsed.scopes.to_string(), "openid email");
    }

    #[test]
    fn rejects_unknown_storage_mode() {
        let parsed = serde_json::from_value::<AuthConfig>(serde_json::json!({
            "issuer": "https://idp.example.com",
            "client_id": "c",
            "redirect_uri": "http://localhost:8400/",
            "storage": "localStorage",
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn only_memory_storage_requires_refresh_per_load() {
        assert!(TokenStorage::Memory.requires_refresh_per_load());
        assert!(!TokenStorage::SessionStorage.requires_refresh_per_load());
    }

    #[test]
    fn endpoints_derive_from_issuer() {
        let config = config();
        assert_eq!(
            config.authorize_endpoint().unwrap().as_str(),
            "https://idp.example.com/oauth2/default/v1/authorize"
        );
        assert_eq!(
            config.token_endpoint().unwrap().as_str(),
            "https://idp.example.com/oauth2/default/v1/token"
        );
    }

    #[test]
    fn endpoint_overrides_win() {
        let config = config().with_token_url("https://other.example.com/token".parse().unwrap());
        assert_eq!(
            config.token_endpoint().unwrap().as_str(),
            "https://other.example.com/token"
        );
    }

    #[test]
    fn app_uri_falls_back_to_redirect_uri() {
        let config = config();
        assert_eq!(config.app_uri().as_str(), "http://localhost:8400/callback");

        let config = config.with_app_uri("http://localhost:8400/".parse().unwrap());
        assert_eq!(config.app_uri().as_str(), "http://localhost:8400/");
    }

    #[test]
    fn validate_requires_client_id_and_openid_scope() {
        assert!(config().validate().is_ok());

        let mut missing_client = config();
        missing_client.client_id = "  ".into();
        assert!(missing_client.validate().is_err());

        let no_openid = config().with_scopes("email");
        let err = no_openid.validate().unwrap_err();
        assert!(err.to_string().contains("openid"));
    }
}
