//! Role evaluation over the current user snapshot.
//!
//! Every function here is a pure query: no I/O, no locking, no panics. An
//! absent user answers `false` (or the redirect decision) for everything.

use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use crate::roles::{WorkType, ROLE_ADMINISTRADOR};
use crate::user::User;

pub fn has_role(user: Option<&User>, role: &str) -> bool {
    user.is_some_and(|user| user.has_role(role))
}

pub fn has_any_role(user: Option<&User>, roles: &[&str]) -> bool {
    match user {
        Some(user) => roles.iter().any(|role| user.has_role(role)),
        None => false,
    }
}

/// Whether the user may upload works of `work_type`; unknown types are denied.
pub fn can_upload(user: Option<&User>, work_type: &str) -> bool {
    let Some(user) = user else {
        return false;
    };
    let Ok(work_type) = WorkType::from_str(work_type) else {
        debug!(work_type, "upload check for unrecognized work type");
        return false;
    };

    if user.is_superuser() || user.has_role(ROLE_ADMINISTRADOR) {
        return true;
    }

    match work_type {
        WorkType::EspecialGrado => user.puede_subir_especial_grado(),
        WorkType::PracticasProfesionales => user.puede_subir_pasantias(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("Authentication required")]
    Unauthenticated,
    #[error("{}", forbidden_message(.required))]
    Forbidden { required: Vec<String> },
}

fn forbidden_message(required: &[String]) -> String {
    if required.is_empty() {
        "Insufficient role".to_string()
    } else {
        format!("Insufficient role. Required one of: {}", required.join(", "))
    }
}

pub fn ensure_role(user: Option<&User>, role: &str) -> Result<(), GuardError> {
    ensure_any_role(user, &[role])
}

/// An empty `allowed` list admits any signed-in user.
pub fn ensure_any_role(user: Option<&User>, allowed: &[&str]) -> Result<(), GuardError> {
    let Some(user) = user else {
        return Err(GuardError::Unauthenticated);
    };
    if allowed.is_empty() || has_any_role(Some(user), allowed) {
        return Ok(());
    }

    debug!(user_id = user.id, ?allowed, "role check failed");
    Err(GuardError::Forbidden {
        required: allowed.iter().map(|value| value.to_string()).collect(),
    })
}

/// Outcome of guarding a protected route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// The session is still being established; render a placeholder.
    Pending,
    RedirectToLogin,
    RedirectToHome,
    Allow,
}

pub fn guard_route(is_loading: bool, user: Option<&User>, allowed: &[&str]) -> RouteDecision {
    if is_loading {
        return RouteDecision::Pending;
    }
    match ensure_any_role(user, allowed) {
        Ok(()) => RouteDecision::Allow,
        Err(GuardError::Unauthenticated) => RouteDecision::RedirectToLogin,
        Err(GuardError::Forbidden { .. }) => RouteDecision::RedirectToHome,
    }
}
