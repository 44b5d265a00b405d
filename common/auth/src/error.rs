use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

const UNAUTHORIZED: u16 = 401;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Login/registration rejected by the server; the message is shown as-is.
    #[error("{0}")]
    InvalidCredentials(String),
    #[error("network error: {0}")]
    Network(String),
    /// A 401 from the server. Recovered silently when a refresh succeeds.
    #[error("authorization expired: {0}")]
    TokenExpired(String),
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("profile fetch failed: {0}")]
    ProfileFetchFailed(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("malformed response body: {0}")]
    Decode(String),
    #[error("session storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// HTTP status carried by the error, if it came from a server response.
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::TokenExpired(_) => Some(UNAUTHORIZED),
            AuthError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(UNAUTHORIZED)
    }

    /// Builds the error for a non-success response status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == UNAUTHORIZED {
            AuthError::TokenExpired(message)
        } else {
            AuthError::Http { status, message }
        }
    }

    /// Message suitable for display next to a form.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials(message)
            | AuthError::TokenExpired(message)
            | AuthError::Http { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
