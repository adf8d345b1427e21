//! The session controller: sequences redirect-callback handling before
//! startup and decides, on every auth-state change, whether to render, to
//! redirect silently for fresh tokens, or to send the user to sign in.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tracing::debug;
use tracing::error;
use tracing::info;
use url::Url;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::provider::IdentityProvider;
use crate::redirect::RedirectFailure;
use crate::redirect::RedirectParams;
use crate::redirect::is_login_redirect;
use crate::state::AuthState;
use crate::state::AuthStateManager;
use crate::state::SessionStatus;
use crate::state::Subscription;
use crate::token_data::Tokens;

/// The hosting environment's location bar.
pub trait Navigator: Send + Sync {
    fn current_url(&self) -> Url;

    /// Replaces the current history entry without a reload.
    fn replace_url(&self, url: &Url);

    /// Navigates away to `url`.
    fn assign(&self, url: &Url);
}

/// Collaborator invoked once the session is authenticated.
pub trait AppRenderer: Send + Sync {
    fn render(&self, state: &AuthState);
}

/// Read access to the current bearer token.
pub trait AccessTokenSource: Send + Sync {
    fn access_token(&self) -> Result<String, AuthError>;
}

/// Whether an unauthenticated session should try to obtain tokens through a
/// non-interactive (`prompt=none`) redirect.
///
/// Only storage modes that lose tokens between loads (or an explicit
/// `force_get_tokens`) qualify, and never after the provider already answered
/// `login_required`, which would otherwise redirect forever.
pub fn should_silently_refresh(
    state: &AuthState,
    config: &AuthConfig,
    last_failure: Option<&RedirectFailure>,
) -> bool {
    if state.is_authenticated || state.is_pending {
        return false;
    }
    if !config.storage.requires_refresh_per_load() && !config.force_get_tokens {
        return false;
    }
    !last_failure.is_some_and(RedirectFailure::is_login_required)
}

pub struct SessionController {
    config: AuthConfig,
    provider: Arc<dyn IdentityProvider>,
    navigator: Arc<dyn Navigator>,
    renderer: Arc<dyn AppRenderer>,
    state_manager: AuthStateManager,
    last_failure: Mutex<Option<RedirectFailure>>,
    /// Set once we navigated away; later notifications belong to a page that
    /// is being unloaded and are ignored until the next `run`.
    navigated: AtomicBool,
    _subscription: Subscription,
}

impl SessionController {
    pub fn new(
        config: AuthConfig,
        provider: Arc<dyn IdentityProvider>,
        navigator: Arc<dyn Navigator>,
        renderer: Arc<dyn AppRenderer>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let state_manager = AuthStateManager::new();
            let weak = weak.clone();
            let subscription = state_manager.subscribe(move |state| {
                if let Some(controller) = weak.upgrade() {
                    controller.on_auth_state_change(state);
                }
            });
            Self {
                config,
                provider,
                navigator,
                renderer,
                state_manager,
                last_failure: Mutex::new(None),
                navigated: AtomicBool::new(false),
                _subscription: subscription,
            }
        })
    }

    /// One application load: consume a pending authorization callback first,
    /// then compute the initial state and notify subscribers.
    pub async fn run(&self) {
        self.navigated.store(false, Ordering::SeqCst);

        let location = self.navigator.current_url();
        if is_login_redirect(&location, &self.config.redirect_uri) {
            self.handle_login_redirect(&location).await;
        }

        self.initialize();
    }

    /// Computes the auth state from the provider and notifies subscribers.
    pub fn initialize(&self) {
        self.state_manager.emit(self.provider.compute_state());
    }

    /// Recomputes the auth state, notifying subscribers only on change.
    pub fn update_auth_state(&self) {
        self.state_manager.update(self.provider.compute_state());
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&AuthState) + Send + Sync + 'static,
    {
        self.state_manager.subscribe(handler)
    }

    pub fn auth_state(&self) -> AuthState {
        self.state_manager.auth_state()
    }

    pub fn status(&self) -> SessionStatus {
        self.auth_state().status()
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Current unexpired access token from the provider's token store.
    pub fn access_token(&self) -> Result<String, AuthError> {
        self.provider
            .access_token()
            .ok_or(AuthError::NotAuthenticated)
    }

    /// Finishes an authorization flow: restores the canonical location so a
    /// reload does not replay the callback, then stores `tokens`.
    pub fn end_auth_flow(&self, tokens: Tokens) {
        if self.store_tokens(tokens) {
            self.update_auth_state();
        }
    }

    /// Forgets the stored tokens and re-evaluates the session.
    pub fn sign_out(&self) {
        if let Err(err) = self.provider.clear_tokens() {
            error!(error = %err, "failed to clear stored tokens");
        }
        self.update_auth_state();
    }

    /// Redirects without user interaction to pick up fresh tokens from an
    /// existing provider session.
    pub fn redirect_to_get_tokens(&self, additional: RedirectParams) {
        let mut params = RedirectParams::silent();
        params.extend(additional);
        self.redirect_to_login(params);
    }

    /// Redirects to the identity provider's sign-in page.
    pub fn redirect_to_login(&self, additional: RedirectParams) {
        let mut params = RedirectParams::new();
        if let Some(state) = &self.config.state {
            params.insert("state", state.clone());
        }
        params.extend(additional);

        match self.provider.begin_redirect(&params) {
            Ok(url) => {
                info!(
                    silent = params.get("prompt") == Some("none"),
                    "redirecting to the identity provider"
                );
                self.navigated.store(true, Ordering::SeqCst);
                self.navigator.assign(&url);
            }
            Err(err) => error!(error = %err, "failed to start authorization redirect"),
        }
    }

    fn last_failure(&self) -> Option<RedirectFailure> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_last_failure(&self, failure: Option<RedirectFailure>) {
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = failure;
    }

    async fn handle_login_redirect(&self, location: &Url) {
        match self.provider.exchange_code_from_url(location).await {
            Ok(tokens) => {
                self.store_tokens(tokens);
            }
            Err(AuthError::LoginRequired) => {
                info!("identity provider has no active session; silent refresh disabled");
                self.set_last_failure(Some(RedirectFailure::LoginRequired));
                self.navigator.replace_url(self.config.app_uri());
            }
            Err(err) => {
                error!(error = %err, "failed to handle login redirect");
                self.set_last_failure(Some(RedirectFailure::Other(err.to_string())));
                self.navigator.replace_url(self.config.app_uri());
            }
        }
    }

    fn store_tokens(&self, tokens: Tokens) -> bool {
        self.navigator.replace_url(self.config.app_uri());
        if let Err(err) = self.provider.set_tokens(tokens) {
            error!(error = %err, "failed to store tokens");
            return false;
        }
        self.set_last_failure(None);
        true
    }

    fn on_auth_state_change(&self, state: &AuthState) {
        if self.navigated.load(Ordering::SeqCst) {
            debug!(status = %state.status(), "navigation in progress; ignoring state change");
            return;
        }

        if should_silently_refresh(state, &self.config, self.last_failure().as_ref()) {
            self.redirect_to_get_tokens(RedirectParams::new());
            return;
        }

        self.render(state);
    }

    fn render(&self, state: &AuthState) {
        match state.status() {
            SessionStatus::Pending => info!("loading session"),
            SessionStatus::Authenticated => {
                info!("session authenticated");
                self.renderer.render(state);
            }
            SessionStatus::Unauthenticated => self.redirect_to_login(RedirectParams::new()),
        }
    }
}

impl AccessTokenSource for SessionController {
    fn access_token(&self) -> Result<String, AuthError> {
        SessionController::access_token(self)
    }
}
