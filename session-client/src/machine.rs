//! Session state and the transitions allowed between its states.
//!
//! The current [`Session`] lives inside a `tokio::sync::watch` channel. Every
//! transition replaces the whole value under the channel's lock, so
//! subscribers only ever observe complete sessions.

use std::fmt;
use std::sync::Arc;

use common_auth::{guards, RouteDecision, User};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Uninitialized,
    Verifying,
    Anonymous,
    Authenticated,
    RefreshingToken,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStatus::Uninitialized => "uninitialized",
            SessionStatus::Verifying => "verifying",
            SessionStatus::Anonymous => "anonymous",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::RefreshingToken => "refreshing_token",
        };
        f.write_str(label)
    }
}

/// Inputs to the state machine.
#[derive(Clone)]
pub enum SessionEvent {
    Startup {
        access_token: Option<String>,
        refresh_token: Option<String>,
    },
    LoginStart,
    LoginSuccess {
        user: User,
        access_token: String,
        refresh_token: Option<String>,
    },
    LoginFailure {
        error: Option<String>,
    },
    UserUpdated(User),
    RefreshStart,
    TokenRefreshed {
        access_token: String,
        refresh_token: Option<String>,
    },
    Logout,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Startup { .. } => "startup",
            SessionEvent::LoginStart => "login_start",
            SessionEvent::LoginSuccess { .. } => "login_success",
            SessionEvent::LoginFailure { .. } => "login_failure",
            SessionEvent::UserUpdated(_) => "user_updated",
            SessionEvent::RefreshStart => "refresh_start",
            SessionEvent::TokenRefreshed { .. } => "token_refreshed",
            SessionEvent::Logout => "logout",
        }
    }
}

impl fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event '{event}' is not valid while {from}")]
pub struct TransitionError {
    pub from: SessionStatus,
    pub event: &'static str,
}

/// Snapshot of the client's authentication state.
///
/// Invariant: `is_authenticated` implies both a user and an access token.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    status: SessionStatus,
    user: Option<User>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    is_authenticated: bool,
    is_loading: bool,
    last_error: Option<String>,
    generation: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            status: SessionStatus::Uninitialized,
            user: None,
            access_token: None,
            refresh_token: None,
            is_authenticated: false,
            is_loading: false,
            last_error: None,
            generation: 0,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("status", &self.status)
            .field("user", &self.user.as_ref().map(|user| &user.username))
            .field("has_access_token", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("is_authenticated", &self.is_authenticated)
            .field("is_loading", &self.is_loading)
            .field("last_error", &self.last_error)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Session {
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Bumped whenever the credentials are replaced or cleared; async work
    /// started under an older generation is stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_role(&self, role: &str) -> bool {
        guards::has_role(self.user(), role)
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        guards::has_any_role(self.user(), roles)
    }

    pub fn can_upload(&self, work_type: &str) -> bool {
        guards::can_upload(self.user(), work_type)
    }

    pub fn guard_route(&self, allowed_roles: &[&str]) -> RouteDecision {
        guards::guard_route(self.is_loading, self.user(), allowed_roles)
    }

    /// Computes the session that follows `event`, leaving `self` untouched.
    pub fn apply(&self, event: SessionEvent) -> Result<Session, TransitionError> {
        use SessionStatus::*;

        let rejected = |event: &SessionEvent| TransitionError {
            from: self.status,
            event: event.name(),
        };
        let mut next = self.clone();

        match (self.status, event) {
            (Uninitialized, SessionEvent::Startup { access_token, refresh_token }) => {
                match access_token {
                    Some(access_token) => {
                        next.status = Verifying;
                        next.is_loading = true;
                        next.access_token = Some(access_token);
                        next.refresh_token = refresh_token;
                    }
                    None => {
                        next.status = Anonymous;
                        next.is_loading = false;
                        next.access_token = None;
                        next.refresh_token = None;
                    }
                }
            }
            (Uninitialized, event) if !matches!(event, SessionEvent::Logout) => {
                return Err(rejected(&event));
            }
            (_, SessionEvent::LoginStart) => {
                next.is_loading = true;
                next.last_error = None;
            }
            (_, SessionEvent::LoginSuccess { user, access_token, refresh_token }) => {
                next.status = Authenticated;
                next.user = Some(user);
                next.access_token = Some(access_token);
                if refresh_token.is_some() {
                    next.refresh_token = refresh_token;
                }
                next.is_authenticated = true;
                next.is_loading = false;
                next.last_error = None;
                next.generation += 1;
            }
            (_, SessionEvent::LoginFailure { error }) => {
                next.clear_credentials();
                next.last_error = error;
                next.generation += 1;
            }
            (Authenticated | RefreshingToken, SessionEvent::UserUpdated(user)) => {
                next.user = Some(user);
            }
            (Authenticated, SessionEvent::RefreshStart) => {
                next.status = RefreshingToken;
                next.is_loading = true;
            }
            (Verifying | RefreshingToken, SessionEvent::RefreshStart) => {}
            (
                Authenticated | RefreshingToken,
                SessionEvent::TokenRefreshed {
                    access_token,
                    refresh_token,
                },
            ) => {
                next.status = Authenticated;
                next.is_loading = false;
                next.access_token = Some(access_token);
                if refresh_token.is_some() {
                    next.refresh_token = refresh_token;
                }
            }
            (Verifying, SessionEvent::TokenRefreshed { access_token, refresh_token }) => {
                next.access_token = Some(access_token);
                if refresh_token.is_some() {
                    next.refresh_token = refresh_token;
                }
            }
            (_, SessionEvent::Logout) => {
                next.clear_credentials();
                next.last_error = None;
                next.generation += 1;
            }
            (_, event) => return Err(rejected(&event)),
        }

        debug_assert!(
            !next.is_authenticated || (next.user.is_some() && next.access_token.is_some())
        );
        Ok(next)
    }

    fn clear_credentials(&mut self) {
        self.status = SessionStatus::Anonymous;
        self.user = None;
        self.access_token = None;
        self.refresh_token = None;
        self.is_authenticated = false;
        self.is_loading = false;
    }
}

/// Sole owner of the [`Session`]; cheap to clone, all clones share one state.
#[derive(Clone)]
pub struct SessionStateMachine {
    sender: Arc<watch::Sender<Session>>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(Session::default());
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn current(&self) -> Session {
        self.sender.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.sender.borrow().status
    }

    pub fn generation(&self) -> u64 {
        self.sender.borrow().generation
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.sender.subscribe()
    }

    /// Applies `event` unconditionally. Returns whether the transition was accepted.
    pub fn dispatch(&self, event: SessionEvent) -> bool {
        self.commit(None, event, || {})
    }

    /// Applies `event` only if the credentials were not replaced since
    /// `generation` was read.
    pub fn dispatch_at(&self, generation: u64, event: SessionEvent) -> bool {
        self.commit(Some(generation), event, || {})
    }

    /// Applies `event` and runs `effect` atomically with it.
    ///
    /// `effect` runs only when the transition is accepted, while the session
    /// lock is held; it must not call back into the machine.
    pub fn commit<F>(&self, generation: Option<u64>, event: SessionEvent, effect: F) -> bool
    where
        F: FnOnce(),
    {
        let name = event.name();
        let mut accepted = false;

        self.sender.send_if_modified(|session| {
            if let Some(expected) = generation {
                if session.generation != expected {
                    debug!(
                        event = name,
                        expected,
                        current = session.generation,
                        "discarding stale session update"
                    );
                    return false;
                }
            }

            match session.apply(event) {
                Ok(next) => {
                    effect();
                    accepted = true;
                    let changed = next != *session;
                    if changed {
                        debug!(event = name, from = %session.status, to = %next.status, "session transition");
                    }
                    *session = next;
                    changed
                }
                Err(err) => {
                    debug!(%err, "rejected session event");
                    false
                }
            }
        });

        accepted
    }
}
