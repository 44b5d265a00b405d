use std::fmt;
use std::sync::Arc;

use common_auth::{AuthError, AuthResult, User};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::machine::{SessionEvent, SessionStateMachine, SessionStatus};
use crate::metrics::{SessionMetrics, OUTCOME_FAILURE, OUTCOME_SUCCESS};
use crate::pipeline::{
    ApiRequest, ApiResponse, RequestPipeline, CHANGE_PASSWORD_PATH, LOGIN_PATH, PROFILE_PATH,
    REGISTER_PATH,
};
use crate::store::{SessionStore, REFRESH_TOKEN_KEY, TOKEN_KEY};

const LOGIN_FALLBACK: &str = "Unable to sign in";
const REGISTER_FALLBACK: &str = "Unable to register";
const PROFILE_FALLBACK: &str = "Unable to load profile";
const CHANGE_PASSWORD_FALLBACK: &str = "Unable to change password";
const STALE_SIGN_IN: &str = "Session ended while signing in";
const NOT_STARTED: &str = "Session has not been started";

#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Account creation payload accepted by the registration endpoint.
#[derive(Clone, Default, Serialize)]
pub struct RegistrationRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password_confirm: String,
    pub first_name: String,
    pub last_name: String,
    pub cedula: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telefono: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrera: Option<i64>,
    pub rol: String,
}

/// Result of a form-style operation; failures carry a displayable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

#[derive(Deserialize)]
struct TokenPair {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

#[derive(Deserialize)]
struct AuthPayload {
    user: User,
    tokens: TokenPair,
}

#[derive(Serialize)]
struct ChangePasswordRequest<'a> {
    password_actual: &'a str,
    password_nueva: &'a str,
    password_nueva_confirm: &'a str,
}

/// Identity operations against the repository API.
#[derive(Clone)]
pub struct AuthGateway {
    pipeline: RequestPipeline,
    machine: SessionStateMachine,
    store: Arc<dyn SessionStore>,
    metrics: SessionMetrics,
}

impl AuthGateway {
    pub fn new(
        pipeline: RequestPipeline,
        machine: SessionStateMachine,
        store: Arc<dyn SessionStore>,
        metrics: SessionMetrics,
    ) -> Self {
        Self {
            pipeline,
            machine,
            store,
            metrics,
        }
    }

    /// Restores the persisted session. Verifies the stored token if there is
    /// one; otherwise the session becomes Anonymous without any request.
    pub async fn start(&self) -> SessionStatus {
        let access_token = self.store.get(TOKEN_KEY);
        let refresh_token = self.store.get(REFRESH_TOKEN_KEY);
        let has_token = access_token.is_some();

        let started = self.machine.dispatch(SessionEvent::Startup {
            access_token,
            refresh_token,
        });
        if !started {
            debug!(status = %self.machine.status(), "session already started");
            return self.machine.status();
        }

        if has_token {
            if let Err(err) = self.verify().await {
                info!(%err, "stored session could not be restored");
            }
        } else {
            debug!("no stored token; starting anonymous");
        }
        self.machine.status()
    }

    /// Loads the profile for the stored token.
    ///
    /// On failure both tokens are dropped and the session becomes Anonymous.
    pub async fn verify(&self) -> AuthResult<User> {
        let generation = self.machine.generation();
        self.machine.dispatch_at(generation, SessionEvent::LoginStart);

        let result = self
            .pipeline
            .send_json::<User>(ApiRequest::get(PROFILE_PATH), PROFILE_FALLBACK)
            .await;

        let user = match result {
            Ok(user) => user,
            Err(err) => {
                warn!(%err, "profile verification failed");
                self.machine.commit(
                    Some(generation),
                    SessionEvent::LoginFailure { error: None },
                    || self.pipeline.clear_credentials(),
                );
                return Err(AuthError::ProfileFetchFailed(err.user_message()));
            }
        };

        // A failed refresh during the profile call has already ended the session.
        let Some(access_token) = self.store.get(TOKEN_KEY) else {
            return Err(AuthError::ProfileFetchFailed(
                "session ended during verification".into(),
            ));
        };
        let refresh_token = self.store.get(REFRESH_TOKEN_KEY);

        let committed = self.machine.commit(
            Some(generation),
            SessionEvent::LoginSuccess {
                user: user.clone(),
                access_token: access_token.clone(),
                refresh_token,
            },
            || self.pipeline.set_default_authorization(Some(&access_token)),
        );
        if !committed {
            return Err(AuthError::ProfileFetchFailed(
                "session changed during verification".into(),
            ));
        }

        info!(user_id = user.id, "session verified");
        Ok(user)
    }

    pub async fn login(&self, credentials: &Credentials) -> AuthOutcome {
        let request = ApiRequest::post(LOGIN_PATH).anonymous().json(credentials);
        self.authenticate("login", request, LOGIN_FALLBACK).await
    }

    /// Creates the account and signs in with it.
    pub async fn register(&self, payload: &RegistrationRequest) -> AuthOutcome {
        let request = ApiRequest::post(REGISTER_PATH).anonymous().json(payload);
        self.authenticate("register", request, REGISTER_FALLBACK).await
    }

    /// Drops all credentials and returns to Anonymous. Safe to call repeatedly.
    pub fn logout(&self) {
        let was_authenticated = self.machine.current().is_authenticated();
        self.pipeline.end_session();
        if was_authenticated {
            info!("signed out");
        }
    }

    pub async fn change_password(&self, current: &str, new: &str, confirm: &str) -> AuthOutcome {
        let body = ChangePasswordRequest {
            password_actual: current,
            password_nueva: new,
            password_nueva_confirm: confirm,
        };

        match self.send_change_password(&body).await {
            Ok(response) if response.is_success() => {
                info!("password changed");
                AuthOutcome::ok()
            }
            Ok(response) => {
                debug!(status = response.status(), "password change rejected");
                AuthOutcome::failed(response.error_message(CHANGE_PASSWORD_FALLBACK))
            }
            Err(err) => {
                warn!(%err, "password change failed");
                AuthOutcome::failed(err.user_message())
            }
        }
    }

    /// Replaces the signed-in user's profile. Returns false when nobody is signed in.
    pub fn update_user(&self, user: User) -> bool {
        self.machine.dispatch(SessionEvent::UserUpdated(user))
    }

    async fn send_change_password(&self, body: &ChangePasswordRequest<'_>) -> AuthResult<ApiResponse> {
        let request = ApiRequest::post(CHANGE_PASSWORD_PATH).json(body)?;
        self.pipeline.send(request).await
    }

    async fn authenticate(
        &self,
        operation: &'static str,
        request: AuthResult<ApiRequest>,
        fallback: &str,
    ) -> AuthOutcome {
        if self.machine.status() == SessionStatus::Uninitialized {
            warn!(operation, "sign-in attempted before the session was started");
            return AuthOutcome::failed(NOT_STARTED);
        }

        let generation = self.machine.generation();
        self.machine.dispatch_at(generation, SessionEvent::LoginStart);

        let result = match request {
            Ok(request) => self.pipeline.send_json::<AuthPayload>(request, fallback).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(AuthPayload { user, tokens }) => {
                let user_id = user.id;
                let TokenPair { access, refresh } = tokens;
                let committed = self.machine.commit(
                    Some(generation),
                    SessionEvent::LoginSuccess {
                        user,
                        access_token: access.clone(),
                        refresh_token: refresh.clone(),
                    },
                    || self.pipeline.store_tokens(&access, refresh.as_deref()),
                );

                if committed {
                    self.metrics.login_attempt(operation, OUTCOME_SUCCESS);
                    info!(user_id, operation, "signed in");
                    AuthOutcome::ok()
                } else {
                    self.metrics.login_attempt(operation, OUTCOME_FAILURE);
                    warn!(user_id, operation, "session ended before sign-in completed; discarding");
                    AuthOutcome::failed(STALE_SIGN_IN)
                }
            }
            Err(err) => {
                let err = into_credentials_error(err);
                let message = err.user_message();
                self.metrics.login_attempt(operation, OUTCOME_FAILURE);
                info!(operation, %err, "sign-in rejected");
                self.machine.commit(
                    Some(generation),
                    SessionEvent::LoginFailure {
                        error: Some(message.clone()),
                    },
                    || self.pipeline.clear_credentials(),
                );
                AuthOutcome::failed(message)
            }
        }
    }
}

/// Client errors from the credential endpoints mean the form was rejected.
fn into_credentials_error(err: AuthError) -> AuthError {
    match err {
        AuthError::TokenExpired(message) => AuthError::InvalidCredentials(message),
        AuthError::Http { status, message } if (400..500).contains(&status) => {
            AuthError::InvalidCredentials(message)
        }
        other => other,
    }
}
