#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Duration;
use chrono::Utc;
use kala_session::AccessToken;
use kala_session::AppRenderer;
use kala_session::AuthConfig;
use kala_session::AuthError;
use kala_session::AuthState;
use kala_session::IdentityProvider;
use kala_session::MemoryTokenStore;
use kala_session::Navigator;
use kala_session::OidcProvider;
use kala_session::RedirectParams;
use kala_session::SessionController;
use kala_session::SessionStatus;
use kala_session::TokenStorage;
use kala_session::Tokens;
use pretty_assertions::assert_eq;
use serde_json::json;
use url::Url;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

const APP: &str = "http://localhost:8400/webui/";

fn url(s: &str) -> Url {
    s.parse().unwrap()
}

fn config(storage: TokenStorage) -> AuthConfig {
    AuthConfig::new(url("https://idp.example.com"), "client", url(APP)).with_storage(storage)
}

#[derive(Default)]
struct FakeNavigator {
    current: Mutex<Option<Url>>,
    replaced: Mutex<Vec<Url>>,
    assigned: Mutex<Vec<Url>>,
}

impl FakeNavigator {
    fn at(location: &str) -> Arc<Self> {
        let navigator = Self::default();
        navigator.set(location);
        Arc::new(navigator)
    }

    fn set(&self, location: &str) {
        *self.current.lock().unwrap() = Some(url(location));
    }

    fn assigned(&self) -> Vec<Url> {
        self.assigned.lock().unwrap().clone()
    }

    fn replaced(&self) -> Vec<Url> {
        self.replaced.lock().unwrap().clone()
    }
}

impl Navigator for FakeNavigator {
    fn current_url(&self) -> Url {
        self.current.lock().unwrap().clone().unwrap()
    }

    fn replace_url(&self, url: &Url) {
        self.replaced.lock().unwrap().push(url.clone());
        *self.current.lock().unwrap() = Some(url.clone());
    }

    fn assign(&self, url: &Url) {
        self.assigned.lock().unwrap().push(url.clone());
    }
}

#[derive(Default)]
struct FakeRenderer {
    rendered: Mutex<Vec<AuthState>>,
}

impl FakeRenderer {
    fn count(&self) -> usize {
        self.rendered.lock().unwrap().len()
    }
}

impl AppRenderer for FakeRenderer {
    fn render(&self, state: &AuthState) {
        self.rendered.lock().unwrap().push(state.clone());
    }
}

/// Provider whose redirect URL echoes the requested parameters and whose
/// callback handling is driven by the callback's query string.
#[derive(Default)]
struct FakeProvider {
    tokens: Mutex<Option<Tokens>>,
    redirects: Mutex<Vec<RedirectParams>>,
}

impl FakeProvider {
    fn with_tokens(access_token: &str) -> Arc<Self> {
        let provider = Self::default();
        *provider.tokens.lock().unwrap() = Some(Tokens::from_access_token(access_token));
        Arc::new(provider)
    }

    fn prompts(&self) -> Vec<Option<String>> {
        self.redirects
            .lock()
            .unwrap()
            .iter()
            .map(|params| params.get("prompt").map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    fn begin_redirect(&self, params: &RedirectParams) -> kala_session::Result<Url> {
        self.redirects.lock().unwrap().push(params.clone());
        let mut url = url("https://idp.example.com/v1/authorize");
        url.query_pairs_mut().extend_pairs(params.iter());
        Ok(url)
    }

    async fn exchange_code_from_url(&self, location: &Url) -> kala_session::Result<Tokens> {
        let mut pairs = location.query_pairs();
        match pairs.next() {
            Some((key, value)) if key == "code" => Ok(Tokens::from_access_token(format!(
                "token-for-{value}"
            ))),
            Some((key, value)) if key == "error" => Err(AuthError::from_oauth(&value, None)),
            _ => Err(AuthError::MissingCode),
        }
    }

    fn get_tokens(&self) -> Option<Tokens> {
        self.tokens.lock().unwrap().clone()
    }

    fn set_tokens(&self, tokens: Tokens) -> kala_session::Result<()> {
        *self.tokens.lock().unwrap() = Some(tokens);
        Ok(())
    }

    fn clear_tokens(&self) -> kala_session::Result<()> {
        *self.tokens.lock().unwrap() = None;
        Ok(())
    }
}

struct Harness {
    controller: Arc<SessionController>,
    provider: Arc<FakeProvider>,
    navigator: Arc<FakeNavigator>,
    renderer: Arc<FakeRenderer>,
}

fn harness(config: AuthConfig, provider: Arc<FakeProvider>, location: &str) -> Harness {
    let navigator = FakeNavigator::at(location);
    let renderer = Arc::new(FakeRenderer::default());
    let controller = SessionController::new(
        config,
        provider.clone(),
        navigator.clone(),
        renderer.clone(),
    );
    Harness {
        controller,
        provider,
        navigator,
        renderer,
    }
}

#[tokio::test]
async fn silent_refresh_happens_once_then_falls_back_to_interactive_login() {
    let h = harness(config(TokenStorage::Memory), Arc::default(), APP);

    h.controller.run().await;
    assert_eq!(h.provider.prompts(), vec![Some("none".to_string())]);
    assert_eq!(h.navigator.assigned().len(), 1);

    // The provider answers the silent attempt with login_required.
    h.navigator.set(&format!("{APP}?error=login_required&state=abc"));
    h.controller.run().await;

    assert_eq!(h.provider.prompts(), vec![Some("none".to_string()), None]);
    assert_eq!(h.navigator.assigned().len(), 2);
    assert_eq!(h.navigator.current_url(), url(APP));
    assert_eq!(h.controller.status(), SessionStatus::Unauthenticated);
    assert_eq!(h.renderer.count(), 0);
}

#[tokio::test]
async fn other_callback_errors_strip_the_url_and_keep_silent_refresh() {
    let h = harness(config(TokenStorage::Memory), Arc::default(), APP);
    h.navigator.set(&format!("{APP}?error=access_denied"));

    h.controller.run().await;

    assert_eq!(h.navigator.replaced(), vec![url(APP)]);
    assert_eq!(h.provider.prompts(), vec![Some("none".to_string())]);
}

#[tokio::test]
async fn callback_with_code_authenticates_and_strips_the_url() {
    let h = harness(
        config(TokenStorage::Memory),
        Arc::default(),
        &format!("{APP}?code=xyz&state=abc"),
    );

    h.controller.run().await;

    assert_eq!(h.navigator.current_url(), url(APP));
    assert_eq!(h.controller.status(), SessionStatus::Authenticated);
    assert_eq!(h.controller.access_token().unwrap(), "token-for-xyz");
    assert_eq!(h.renderer.count(), 1);
    assert!(h.navigator.assigned().is_empty());
}

#[tokio::test]
async fn stored_session_renders_without_redirect() {
    let h = harness(
        config(TokenStorage::SessionStorage),
        FakeProvider::with_tokens("stored"),
        APP,
    );

    h.controller.run().await;

    assert_eq!(h.renderer.count(), 1);
    assert!(h.navigator.assigned().is_empty());
    assert!(h.navigator.replaced().is_empty());
}

#[tokio::test]
async fn session_storage_without_tokens_goes_straight_to_login() {
    let h = harness(config(TokenStorage::SessionStorage), Arc::default(), APP);

    h.controller.run().await;

    assert_eq!(h.provider.prompts(), vec![None]);
}

#[tokio::test]
async fn force_get_tokens_enables_silent_refresh_for_session_storage() {
    let h = harness(
        config(TokenStorage::SessionStorage).with_force_get_tokens(true),
        Arc::default(),
        APP,
    );

    h.controller.run().await;

    assert_eq!(h.provider.prompts(), vec![Some("none".to_string())]);
}

#[tokio::test]
async fn configured_state_is_forwarded_on_every_redirect() {
    let h = harness(
        config(TokenStorage::SessionStorage).with_state("fixed"),
        Arc::default(),
        APP,
    );

    h.controller.run().await;

    let redirects = h.provider.redirects.lock().unwrap().clone();
    assert_eq!(redirects.len(), 1);
    assert_eq!(redirects[0].get("state"), Some("fixed"));
}

#[test]
fn access_token_requires_a_session() {
    let h = harness(config(TokenStorage::SessionStorage), Arc::default(), APP);

    assert!(matches!(
        h.controller.access_token(),
        Err(AuthError::NotAuthenticated)
    ));

    h.controller
        .end_auth_flow(Tokens::from_access_token("eyJ.exact.token"));

    assert_eq!(h.controller.access_token().unwrap(), "eyJ.exact.token");
    assert_eq!(h.controller.status(), SessionStatus::Authenticated);
    assert_eq!(h.navigator.current_url(), url(APP));
    assert_eq!(h.renderer.count(), 1);
}

#[tokio::test]
async fn expired_tokens_are_neither_a_session_nor_a_bearer_token() {
    let provider = Arc::new(FakeProvider::default());
    let mut tokens = Tokens::from_access_token("stale");
    tokens.access_token = AccessToken::new("stale")
        .expiring_in(Utc::now() - Duration::hours(2), 60)
        .unwrap();
    provider.set_tokens(tokens).unwrap();
    let h = harness(config(TokenStorage::SessionStorage), provider, APP);

    h.controller.run().await;

    assert_eq!(h.controller.status(), SessionStatus::Unauthenticated);
    assert!(matches!(
        h.controller.access_token(),
        Err(AuthError::NotAuthenticated)
    ));
    assert_eq!(h.provider.prompts(), vec![None]);
}

#[tokio::test]
async fn sign_out_clears_tokens_and_redirects_to_login() {
    let h = harness(
        config(TokenStorage::SessionStorage),
        FakeProvider::with_tokens("stored"),
        APP,
    );
    h.controller.run().await;
    assert_eq!(h.controller.status(), SessionStatus::Authenticated);

    h.controller.sign_out();

    assert_eq!(h.controller.status(), SessionStatus::Unauthenticated);
    assert!(h.provider.get_tokens().is_none());
    assert_eq!(h.provider.prompts(), vec![None]);
}

#[tokio::test]
async fn subscribers_see_every_initialization() {
    let h = harness(
        config(TokenStorage::SessionStorage),
        FakeProvider::with_tokens("stored"),
        APP,
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _subscription = h.controller.subscribe(move |state| {
        sink.lock().unwrap().push(state.status());
    });

    h.controller.run().await;
    h.controller.run().await;
    h.controller.update_auth_state();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![SessionStatus::Authenticated, SessionStatus::Authenticated]
    );
}

#[tokio::test]
async fn oidc_round_trip_through_the_controller() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "real-access-token",
            "token_type": "Bearer",
            "expires_in": 3600,
            "scope": "openid email",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = AuthConfig::new(url(&server.uri()), "client", url(APP))
        .with_storage(TokenStorage::Memory);
    let provider = Arc::new(
        OidcProvider::new(config.clone(), Arc::new(MemoryTokenStore::default())).unwrap(),
    );
    let navigator = FakeNavigator::at(APP);
    let renderer = Arc::new(FakeRenderer::default());
    let controller =
        SessionController::new(config, provider, navigator.clone(), renderer.clone());

    controller.run().await;
    let authorize = navigator.assigned().pop().unwrap();
    let (_, state) = authorize
        .query_pairs()
        .find(|(key, _)| key == "state")
        .unwrap();
    let prompt = authorize
        .query_pairs()
        .find(|(key, _)| key == "prompt")
        .map(|(_, value)| value.into_owned());
    assert_eq!(prompt.as_deref(), Some("none"));

    navigator.set(&format!("{APP}?code=auth-code&state={state}"));
    controller.run().await;

    assert_eq!(controller.status(), SessionStatus::Authenticated);
    assert_eq!(controller.access_token().unwrap(), "real-access-token");
    assert_eq!(navigator.current_url(), url(APP));
    assert_eq!(renderer.count(), 1);
}

#[tokio::test]
async fn failed_code_exchange_strips_the_url_and_redirects_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/token"))
        .respond_with(ResponseTemplate::new(500).set_body_string("token service down"))
        .expect(1)
        .mount(&server)
        .await;

    let config = AuthConfig::new(url(&server.uri()), "client", url(APP))
        .with_storage(TokenStorage::SessionStorage);
    let provider = Arc::new(
        OidcProvider::new(config.clone(), Arc::new(MemoryTokenStore::default())).unwrap(),
    );
    let navigator = FakeNavigator::at(APP);
    let renderer = Arc::new(FakeRenderer::default());
    let controller =
        SessionController::new(config, provider, navigator.clone(), renderer.clone());

    controller.run().await;
    let authorize = navigator.assigned().pop().unwrap();
    let (_, state) = authorize
        .query_pairs()
        .find(|(key, _)| key == "state")
        .unwrap();

    navigator.set(&format!("{APP}?code=auth-code&state={state}"));
    controller.run().await;

    assert_eq!(navigator.replaced(), vec![url(APP)]);
    assert_eq!(navigator.current_url(), url(APP));
    assert_eq!(controller.status(), SessionStatus::Unauthenticated);
    assert_eq!(navigator.assigned().len(), 2);
    assert_eq!(renderer.count(), 0);
}
