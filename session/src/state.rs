//! Derived session state and the manager that broadcasts its changes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::Weak;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

use crate::token_data::IdTokenInfo;
use crate::token_data::Tokens;

/// Snapshot of the session as seen by subscribers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AuthState {
    pub is_authenticated: bool,
    pub is_pending: bool,
    #[serde(skip)]
    pub access_token: Option<String>,
    pub id_token: Option<IdTokenInfo>,
}

impl AuthState {
    /// State before the identity provider has been consulted.
    pub fn pending() -> Self {
        Self {
            is_pending: true,
            ..Self::default()
        }
    }

    pub fn unauthenticated() -> Self {
        Self::default()
    }

    /// Computes the state for the given stored tokens. Expired access tokens
    /// count as no session.
    pub fn from_tokens(tokens: Option<&Tokens>, now: DateTime<Utc>) -> Self {
        match tokens {
            Some(tokens) if !tokens.access_token.is_expired(now) => Self {
                is_authenticated: true,
                is_pending: false,
                access_token: Some(tokens.access_token.value.clone()),
                id_token: tokens.id_token.as_ref().map(|t| t.claims().clone()),
            },
            _ => Self::unauthenticated(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        if self.is_pending {
            SessionStatus::Pending
        } else if self.is_authenticated {
            SessionStatus::Authenticated
        } else {
            SessionStatus::Unauthenticated
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Unauthenticated,
    Authenticated,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated => "authenticated",
        };
        f.write_str(label)
    }
}

type Handler = Arc<dyn Fn(&AuthState) + Send + Sync>;

struct Inner {
    current: AuthState,
    last_emitted: Option<AuthState>,
    subscribers: Vec<(u64, Handler)>,
    next_id: u64,
    emitting: bool,
    queue: VecDeque<Update>,
}

struct Update {
    state: AuthState,
    force: bool,
}

/// Holds the current [`AuthState`] and notifies subscribers of changes.
///
/// Notifications are delivered one at a time: an update issued from inside a
/// handler is queued and delivered after the current round completes. Updates
/// equal to the last emitted state are dropped unless forced.
#[derive(Clone)]
pub struct AuthStateManager {
    inner: Arc<Mutex<Inner>>,
}

impl Default for AuthStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthStateManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                current: AuthState::pending(),
                last_emitted: None,
                subscribers: Vec::new(),
                next_id: 0,
                emitting: false,
                queue: VecDeque::new(),
            })),
        }
    }

    pub fn auth_state(&self) -> AuthState {
        self.lock().current.clone()
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&AuthState) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(handler)));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Records `state` and notifies subscribers if it differs from the last
    /// emitted state.
    pub fn update(&self, state: AuthState) {
        self.enqueue(Update {
            state,
            force: false,
        });
    }

    /// Records `state` and notifies subscribers unconditionally.
    pub fn emit(&self, state: AuthState) {
        self.enqueue(Update { state, force: true });
    }

    fn enqueue(&self, update: Update) {
        {
            let mut inner = self.lock();
            inner.queue.push_back(update);
            if inner.emitting {
                return;
            }
            inner.emitting = true;
        }

        loop {
            let (state, handlers) = {
                let mut inner = self.lock();
                let Some(Update { state, force }) = inner.queue.pop_front() else {
                    inner.emitting = false;
                    return;
                };
                inner.current = state.clone();
                if !force && inner.last_emitted.as_ref() == Some(&state) {
                    continue;
                }
                inner.last_emitted = Some(state.clone());
                let handlers: Vec<Handler> = inner
                    .subscribers
                    .iter()
                    .map(|(_, handler)| Arc::clone(handler))
                    .collect();
                (state, handlers)
            };
            for handler in handlers {
                handler(&state);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle returned by [`AuthStateManager::subscribe`]; the handler stays
/// registered until this is dropped or [`Subscription::unsubscribe`] is called.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    id: u64,
    inner: Weak<Mutex<Inner>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .subscribers
                .retain(|(id, _)| *id != self.id);
        }
    }
}
