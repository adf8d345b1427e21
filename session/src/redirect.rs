use std::collections::BTreeMap;

use url::Url;

/// Query parameters that mark a location as an authorization callback.
const CALLBACK_PARAMS: &[&str] = &["code", "interaction_code", "error"];

/// Extra query parameters for one authorization redirect (`prompt`, `state`,
/// ...). Built per attempt and never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RedirectParams(BTreeMap<String, String>);

impl RedirectParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters for a non-interactive redirect: the provider answers with
    /// `error=login_required` instead of showing a sign-in page.
    pub fn silent() -> Self {
        Self::new().with("prompt", "none")
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Adds every entry of `other`, overwriting existing keys.
    pub fn extend(&mut self, other: RedirectParams) {
        self.0.extend(other.0);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Whether `location` is the identity provider redirecting back to us with an
/// authorization response: same origin and path as `redirect_uri`, carrying a
/// code or an error.
pub fn is_login_redirect(location: &Url, redirect_uri: &Url) -> bool {
    if location.origin() != redirect_uri.origin() || location.path() != redirect_uri.path() {
        return false;
    }
    location
        .query_pairs()
        .any(|(key, _)| CALLBACK_PARAMS.contains(&key.as_ref()))
}

/// Outcome of the most recent redirect attempt, kept to break redirect loops.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RedirectFailure {
    /// The provider had no active session for a silent redirect.
    LoginRequired,
    Other(String),
}

impl RedirectFailure {
    pub fn is_login_required(&self) -> bool {
        matches!(self, Self::LoginRequired)
    }
}
