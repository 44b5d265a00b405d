//! Outbound request pipeline.
//!
//! Every request to the repository API goes through [`RequestPipeline::send`],
//! which attaches the current bearer token and recovers from an expired
//! access token by refreshing it once and replaying the request. Concurrent
//! requests that fail together share a single refresh call.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use common_auth::{AuthError, AuthResult};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::machine::{SessionEvent, SessionStateMachine, SessionStatus};
use crate::metrics::{
    SessionMetrics, OUTCOME_FAILURE, OUTCOME_SHARED, OUTCOME_SUCCESS, OUTCOME_TIMEOUT,
};
use crate::store::{SessionStore, REFRESH_TOKEN_KEY, TOKEN_KEY};

pub const LOGIN_PATH: &str = "/auth/login/";
pub const REGISTER_PATH: &str = "/auth/register/";
pub const REFRESH_PATH: &str = "/auth/token/refresh/";
pub const PROFILE_PATH: &str = "/usuarios/perfil/";
pub const CHANGE_PASSWORD_PATH: &str = "/usuarios/cambiar_password/";

const UNAUTHORIZED: u16 = 401;

#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<Value>,
    credentials: bool,
    retried: bool,
    trace_id: Uuid,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            credentials: true,
            retried: false,
            trace_id: Uuid::new_v4(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> AuthResult<Self> {
        let value = serde_json::to_value(body)
            .map_err(|err| AuthError::Decode(format!("failed to encode request body: {err}")))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Sends without credentials; a 401 is returned as-is.
    pub fn anonymous(mut self) -> Self {
        self.credentials = false;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: u16,
    body: Vec<u8>,
}

impl ApiResponse {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> AuthResult<T> {
        serde_json::from_slice(&self.body).map_err(|err| AuthError::Decode(err.to_string()))
    }

    /// Server-provided error text, or `fallback` when the body has none.
    pub fn error_message(&self, fallback: &str) -> String {
        detail_message(&self.body).unwrap_or_else(|| fallback.to_string())
    }

    pub fn into_error(self, fallback: &str) -> AuthError {
        let message = self.error_message(fallback);
        AuthError::from_status(self.status, message)
    }
}

/// Extracts the first human-readable error from an API error body.
///
/// Looks at `detail`, then `non_field_errors`, then the first field error in
/// the order the server sent them, rendered as `field: message`.
pub fn detail_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;

    if let Some(detail) = value.get("detail").and_then(Value::as_str) {
        return Some(detail.to_string());
    }

    if let Some(first) = value
        .get("non_field_errors")
        .and_then(Value::as_array)
        .and_then(|errors| errors.first())
        .and_then(Value::as_str)
    {
        return Some(first.to_string());
    }

    value.as_object()?.iter().find_map(|(field, errors)| {
        let message = match errors {
            Value::String(message) => Some(message.as_str()),
            Value::Array(items) => items.first().and_then(Value::as_str),
            _ => None,
        }?;
        Some(format!("{field}: {message}"))
    })
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

#[derive(Clone)]
pub struct RequestPipeline {
    client: Client,
    base_url: Arc<str>,
    store: Arc<dyn SessionStore>,
    machine: SessionStateMachine,
    default_authorization: Arc<RwLock<Option<String>>>,
    refresh_lock: Arc<Mutex<()>>,
    refresh_timeout: Duration,
    metrics: SessionMetrics,
}

impl RequestPipeline {
    pub fn new(
        config: &ClientConfig,
        store: Arc<dyn SessionStore>,
        machine: SessionStateMachine,
        metrics: SessionMetrics,
    ) -> AuthResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| AuthError::Network(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url: Arc::from(config.base_url.as_str()),
            store,
            machine,
            default_authorization: Arc::new(RwLock::new(None)),
            refresh_lock: Arc::new(Mutex::new(())),
            refresh_timeout: config.refresh_timeout,
            metrics,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Token attached to requests when the store holds none.
    pub fn default_authorization(&self) -> Option<String> {
        self.default_authorization
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_default_authorization(&self, token: Option<&str>) {
        let mut guard = self
            .default_authorization
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = token.map(str::to_string);
    }

    pub(crate) fn store_tokens(&self, access: &str, refresh: Option<&str>) {
        self.store.set(TOKEN_KEY, access);
        if let Some(refresh) = refresh {
            self.store.set(REFRESH_TOKEN_KEY, refresh);
        }
        self.set_default_authorization(Some(access));
    }

    pub(crate) fn clear_credentials(&self) {
        self.store.remove(TOKEN_KEY);
        self.store.remove(REFRESH_TOKEN_KEY);
        self.set_default_authorization(None);
    }

    /// Forces the session to Anonymous and forgets all credentials.
    pub fn end_session(&self) {
        self.machine
            .commit(None, SessionEvent::Logout, || self.clear_credentials());
    }

    /// Like [`end_session`](Self::end_session), unless the credentials were
    /// already replaced after `generation` was read.
    fn end_session_at(&self, generation: u64) {
        let ended = self
            .machine
            .commit(Some(generation), SessionEvent::Logout, || {
                self.clear_credentials()
            });
        if !ended {
            debug!(generation, "session already replaced; not ending it again");
        }
    }

    /// Sends `request` and returns the response whatever its status.
    ///
    /// Only transport failures are errors. A 401 on an authenticated request
    /// is answered by one refresh-and-replay; if that is impossible the
    /// original 401 response is returned.
    pub async fn send(&self, request: ApiRequest) -> AuthResult<ApiResponse> {
        let token = self.outbound_token(&request);
        let response = self.execute(&request, token.as_deref()).await?;

        if response.status() != UNAUTHORIZED || !request.credentials || request.retried {
            return Ok(response);
        }

        self.recover(request, token, response).await
    }

    /// Sends `request` and decodes a successful body as `T`.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        fallback: &str,
    ) -> AuthResult<T> {
        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(response.into_error(fallback));
        }
        response.json()
    }

    fn outbound_token(&self, request: &ApiRequest) -> Option<String> {
        if !request.credentials {
            return None;
        }
        self.store
            .get(TOKEN_KEY)
            .or_else(|| self.default_authorization())
    }

    async fn execute(&self, request: &ApiRequest, token: Option<&str>) -> AuthResult<ApiResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(request.method.clone(), &url);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|err| {
            warn!(trace_id = %request.trace_id, path = %request.path, ?err, "request failed");
            AuthError::Network(err.to_string())
        })?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| AuthError::Network(err.to_string()))?
            .to_vec();

        debug!(
            trace_id = %request.trace_id,
            method = %request.method,
            path = %request.path,
            status,
            authenticated = token.is_some(),
            retried = request.retried,
            "request completed"
        );
        Ok(ApiResponse { status, body })
    }

    async fn recover(
        &self,
        mut request: ApiRequest,
        sent_with: Option<String>,
        original: ApiResponse,
    ) -> AuthResult<ApiResponse> {
        request.retried = true;
        let trace_id = request.trace_id;

        let guard = self.refresh_lock.lock().await;

        // Another request may have renewed the token while this one waited.
        let current = self.store.get(TOKEN_KEY);
        if let Some(token) = current.filter(|token| Some(token) != sent_with.as_ref()) {
            drop(guard);
            self.metrics.refresh_attempt(OUTCOME_SHARED);
            debug!(%trace_id, "token already refreshed; replaying");
            return self.replay(request, &token).await;
        }

        let Some(refresh_token) = self.store.get(REFRESH_TOKEN_KEY) else {
            debug!(%trace_id, "no refresh token; returning 401");
            return Ok(original);
        };

        let generation = self.machine.generation();
        self.machine
            .dispatch_at(generation, SessionEvent::RefreshStart);

        let refreshed = match timeout(self.refresh_timeout, self.refresh(&refresh_token, trace_id)).await
        {
            Ok(Ok(tokens)) => tokens,
            Ok(Err(err)) => {
                self.metrics.refresh_attempt(OUTCOME_FAILURE);
                warn!(%trace_id, %err, "token refresh failed; ending session");
                self.end_session_at(generation);
                return Ok(original);
            }
            Err(_) => {
                self.metrics.refresh_attempt(OUTCOME_TIMEOUT);
                warn!(
                    %trace_id,
                    timeout_ms = self.refresh_timeout.as_millis() as u64,
                    "token refresh timed out; ending session"
                );
                self.end_session_at(generation);
                return Ok(original);
            }
        };

        let RefreshResponse { access, refresh } = refreshed;
        let applied = self.machine.commit(
            Some(generation),
            SessionEvent::TokenRefreshed {
                access_token: access.clone(),
                refresh_token: refresh.clone(),
            },
            || self.store_tokens(&access, refresh.as_deref()),
        );
        if !applied {
            if self.machine.status() != SessionStatus::Uninitialized {
                info!(%trace_id, "credentials replaced during refresh; discarding new token");
                return Ok(original);
            }
            // Session not started yet; the store stays authoritative.
            self.store_tokens(&access, refresh.as_deref());
        }
        drop(guard);

        self.metrics.refresh_attempt(OUTCOME_SUCCESS);
        info!(%trace_id, rotated = refresh.is_some(), "access token refreshed");
        self.replay(request, &access).await
    }

    async fn refresh(&self, refresh_token: &str, trace_id: Uuid) -> AuthResult<RefreshResponse> {
        let mut request = ApiRequest::post(REFRESH_PATH)
            .anonymous()
            .json(&RefreshRequest {
                refresh: refresh_token,
            })?;
        request.trace_id = trace_id;

        let response = self.execute(&request, None).await?;
        if !response.is_success() {
            let message = response.error_message("refresh rejected");
            return Err(AuthError::RefreshFailed(format!(
                "HTTP {}: {message}",
                response.status()
            )));
        }
        response
            .json()
            .map_err(|err| AuthError::RefreshFailed(err.to_string()))
    }

    async fn replay(&self, request: ApiRequest, token: &str) -> AuthResult<ApiResponse> {
        self.metrics.replayed_request();
        self.execute(&request, Some(token)).await
    }
}
