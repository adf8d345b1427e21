//! [`Navigator`] for a terminal: navigation opens the system browser and the
//! identity provider's redirect back is caught by a listener bound to the
//! redirect URI.

use std::io;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use kala_session::Navigator;
use tiny_http::Header;
use tiny_http::Request;
use tiny_http::Response;
use tiny_http::Server;
use tracing::debug;
use tracing::error;
use url::Url;

const SIGNED_IN_HTML: &str = "<!doctype html><html><body><p>Kala sign-in finished. \
You can close this window and return to the terminal.</p></body></html>";

pub struct LoopbackBrowser {
    redirect_uri: Url,
    location: Mutex<Url>,
    navigation: Mutex<Option<Url>>,
    server: Mutex<Option<Arc<Server>>>,
    open_system_browser: bool,
}

impl LoopbackBrowser {
    /// Starts "loaded" at `app_uri`.
    pub fn new(app_uri: Url, redirect_uri: Url, open_system_browser: bool) -> Self {
        Self {
            redirect_uri,
            location: Mutex::new(app_uri),
            navigation: Mutex::new(None),
            server: Mutex::new(None),
            open_system_browser,
        }
    }

    /// The URL of the last [`Navigator::assign`], if any, clearing it.
    pub fn take_navigation(&self) -> Option<Url> {
        self.navigation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn set_location(&self, url: Url) {
        *self.location.lock().unwrap_or_else(PoisonError::into_inner) = url;
    }

    /// Waits for the identity provider to redirect the browser back to the
    /// redirect URI and returns the full callback URL.
    pub async fn wait_for_callback(&self, timeout: Duration) -> io::Result<Url> {
        let server = self.listen()?;
        let redirect_uri = self.redirect_uri.clone();
        tokio::task::spawn_blocking(move || receive_callback(&server, &redirect_uri, timeout))
            .await
            .map_err(io::Error::other)?
    }

    fn listen(&self) -> io::Result<Arc<Server>> {
        let mut guard = self.server.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(server) = guard.as_ref() {
            return Ok(Arc::clone(server));
        }
        let host = self.redirect_uri.host_str().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "redirect_uri has no host")
        })?;
        let port = self.redirect_uri.port_or_known_default().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "redirect_uri has no port")
        })?;
        let server = Arc::new(Server::http((host, port)).map_err(io::Error::other)?);
        debug!(host, port, "listening for the sign-in callback");
        *guard = Some(Arc::clone(&server));
        Ok(server)
    }
}

impl Navigator for LoopbackBrowser {
    fn current_url(&self) -> Url {
        self.location
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_url(&self, url: &Url) {
        self.set_location(url.clone());
    }

    fn assign(&self, url: &Url) {
        // The listener must be up before the provider can redirect back.
        if let Err(err) = self.listen() {
            error!(
                error = %err,
                redirect_uri = %self.redirect_uri,
                "failed to listen for the sign-in callback"
            );
        }
        *self
            .navigation
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(url.clone());

        if self.open_system_browser && webbrowser::open(url.as_str()).is_ok() {
            eprintln!("Opened your browser to sign in. If nothing happened, visit:\n\n{url}\n");
        } else {
            eprintln!("Visit this URL to sign in:\n\n{url}\n");
        }
    }
}

fn receive_callback(server: &Server, redirect_uri: &Url, timeout: Duration) -> io::Result<Url> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "timed out waiting for the sign-in callback",
            ));
        }
        let Some(request) = server.recv_timeout(remaining)? else {
            continue;
        };
        match redirect_uri.join(request.url()) {
            Ok(location) if location.path() == redirect_uri.path() => {
                respond(request, 200, SIGNED_IN_HTML, "text/html; charset=utf-8");
                return Ok(location);
            }
            _ => {
                debug!(url = request.url(), "ignoring request on the callback listener");
                respond(request, 404, "Not Found", "text/plain; charset=utf-8");
            }
        }
    }
}

fn respond(request: Request, status: u16, body: &str, content_type: &str) {
    let mut response =
        Response::from_string(body).with_status_code(tiny_http::StatusCode(status));
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes()) {
        response = response.with_header(header);
    }
    let _ = request.respond(response);
}
