use thiserror::Error;

/// OAuth error code returned by the identity provider when a `prompt=none`
/// request finds no active provider-side session.
pub const LOGIN_REQUIRED: &str = "login_required";

pub type Result<T> = std::result::Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    /// The identity provider has no active session for a non-interactive
    /// (`prompt=none`) redirect.
    #[error("login required: the identity provider has no active session")]
    LoginRequired,

    /// Any other OAuth error reported by the identity provider, either on the
    /// redirect callback or by the token endpoint.
    #[error("identity provider error `{error}`{}", describe(.description))]
    Provider {
        error: String,
        description: Option<String>,
    },

    #[error("authorization code exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("redirect callback is missing the authorization code")]
    MissingCode,

    #[error("redirect callback state does not match the pending authorization")]
    StateMismatch,

    #[error("no authorization is pending for this redirect callback")]
    NoPendingAuthorization,

    #[error("not authenticated: no access token is available")]
    NotAuthenticated,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("token storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl AuthError {
    /// Maps an OAuth `error` / `error_description` pair to the matching variant.
    pub fn from_oauth(error: &str, description: Option<&str>) -> Self {
        if error == LOGIN_REQUIRED {
            return Self::LoginRequired;
        }
        Self::Provider {
            error: error.to_string(),
            description: description.map(str::to_string),
        }
    }
}

fn describe(description: &Option<String>) -> String {
    match description {
        Some(d) if !d.is_empty() => format!(": {d}"),
        _ => String::new(),
    }
}
