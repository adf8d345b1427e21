use chrono::Utc;
use url::Url;

use crate::error::Result;
use crate::redirect::RedirectParams;
use crate::state::AuthState;
use crate::token_data::Tokens;

/// Capabilities the session controller needs from an OpenID-Connect client.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Prepares an authorization-code redirect and returns the URL the
    /// environment should navigate to.
    fn begin_redirect(&self, params: &RedirectParams) -> Result<Url>;

    /// Consumes the authorization response carried by `location` and
    /// exchanges it for tokens.
    async fn exchange_code_from_url(&self, location: &Url) -> Result<Tokens>;

    fn get_tokens(&self) -> Option<Tokens>;

    fn set_tokens(&self, tokens: Tokens) -> Result<()>;

    fn clear_tokens(&self) -> Result<()>;

    /// Computes the session state from the currently stored tokens.
    fn compute_state(&self) -> AuthState {
        AuthState::from_tokens(self.get_tokens().as_ref(), Utc::now())
    }

    /// The stored access token, unless it has expired.
    fn access_token(&self) -> Option<String> {
        self.get_tokens()
            .map(|tokens| tokens.access_token)
            .filter(|token| !token.is_expired(Utc::now()))
            .map(|token| token.value)
    }
}
