//! Browser-style OpenID-Connect session handling: redirect callbacks, token
//! storage, derived auth state and the controller that drives sign-in.

mod config;
mod controller;
mod error;
mod oidc;
pub mod pkce;
mod provider;
mod redirect;
mod state;
pub mod token_data;
pub mod token_store;

pub use config::AuthConfig;
pub use config::ConfigError;
pub use config::FlowType;
pub use config::Scopes;
pub use config::TokenStorage;
pub use controller::AccessTokenSource;
pub use controller::AppRenderer;
pub use controller::Navigator;
pub use controller::SessionController;
pub use controller::should_silently_refresh;
pub use error::AuthError;
pub use error::LOGIN_REQUIRED;
pub use error::Result;
pub use oidc::OidcProvider;
pub use provider::IdentityProvider;
pub use redirect::RedirectFailure;
pub use redirect::RedirectParams;
pub use redirect::is_login_redirect;
pub use state::AuthState;
pub use state::AuthStateManager;
pub use state::SessionStatus;
pub use state::Subscription;
pub use token_data::AccessToken;
pub use token_data::IdToken;
pub use token_data::IdTokenInfo;
pub use token_data::Tokens;
pub use token_store::FileTokenStore;
pub use token_store::MemoryTokenStore;
pub use token_store::TokenStore;
pub use token_store::token_store_for;
