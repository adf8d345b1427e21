use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use kala_session::AppRenderer;
use kala_session::AuthState;
use kala_session::IdentityProvider;
use kala_session::OidcProvider;
use kala_session::SessionController;
use kala_session::SessionStatus;
use kala_session::token_store_for;
use tracing::debug;
use tracing::info;

use crate::browser::LoopbackBrowser;
use crate::config::KalaConfig;

/// Upper bound on page loads per sign-in: a silent attempt, its
/// `login_required` answer, the interactive callback and one spare.
const MAX_LOADS: usize = 4;

pub(crate) const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

struct SignedIn;

impl AppRenderer for SignedIn {
    fn render(&self, state: &AuthState) {
        let who = state
            .id_token
            .as_ref()
            .and_then(|claims| claims.email.as_deref().or(claims.subject.as_deref()))
            .unwrap_or("unknown user");
        info!(user = who, "signed in");
    }
}

pub(crate) struct Session {
    pub controller: Arc<SessionController>,
    pub provider: Arc<OidcProvider>,
    browser: Arc<LoopbackBrowser>,
}

impl Session {
    pub fn new(config: &KalaConfig, kala_home: &Path, open_browser: bool) -> Result<Self> {
        let store = token_store_for(config.auth.storage, kala_home);
        let mut provider = OidcProvider::new(config.auth.clone(), store)?;
        if let Some(timeout) = config.request_timeout() {
            provider = provider.with_http_client(http_client(timeout)?);
        }
        let provider = Arc::new(provider);
        let browser = Arc::new(LoopbackBrowser::new(
            config.auth.app_uri().clone(),
            config.auth.redirect_uri.clone(),
            open_browser,
        ));
        let controller = SessionController::new(
            config.auth.clone(),
            provider.clone(),
            browser.clone(),
            Arc::new(SignedIn),
        );
        Ok(Self {
            controller,
            provider,
            browser,
        })
    }

    /// Stored session state, without contacting the identity provider.
    pub fn stored_state(&self) -> AuthState {
        self.provider.compute_state()
    }

    /// Runs application loads until the session is authenticated, following
    /// every redirect through the system browser.
    pub async fn sign_in(&self) -> Result<()> {
        for _ in 0..MAX_LOADS {
            self.controller.run().await;
            if self.controller.status() == SessionStatus::Authenticated {
                return Ok(());
            }
            let Some(target) = self.browser.take_navigation() else {
                bail!("not signed in; run `kala login`");
            };
            debug!(%target, "waiting for the identity provider to redirect back");
            let callback = self
                .browser
                .wait_for_callback(CALLBACK_TIMEOUT)
                .await
                .context("sign-in did not complete")?;
            self.browser.set_location(callback);
        }
        bail!("sign-in did not complete after {MAX_LOADS} attempts")
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")
}
