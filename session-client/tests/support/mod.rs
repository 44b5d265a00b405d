#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use httpmock::MockServer;
use serde_json::{json, Value};
use session_client::{
    ClientConfig, InMemorySessionStore, SessionContext, REFRESH_TOKEN_KEY, TOKEN_KEY,
};

pub const API_PREFIX: &str = "/api/v1";

pub fn api_path(path: &str) -> String {
    format!("{API_PREFIX}{path}")
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

pub fn user_json(id: i64, username: &str, rol: &str) -> Value {
    json!({
        "id": id,
        "username": username,
        "email": format!("{username}@example.edu"),
        "first_name": "Ana",
        "last_name": "Rojas",
        "cedula": "12345678",
        "telefono": null,
        "carrera": 2,
        "carrera_display": "Ingeniería Informática",
        "rol": rol,
        "rol_display": rol,
        "activo": true,
        "verificado": true,
        "fecha_registro": "2024-03-01T10:00:00Z",
        "ultima_conexion": null
    })
}

pub fn auth_body(user: Value, access: &str, refresh: &str) -> Value {
    json!({
        "user": user,
        "tokens": { "access": access, "refresh": refresh }
    })
}

pub fn config_for(server: &MockServer) -> ClientConfig {
    ClientConfig::default().with_base_url(server.url(API_PREFIX))
}

pub fn context_with(config: ClientConfig, entries: &[(&str, &str)]) -> SessionContext {
    let store = InMemorySessionStore::with_entries(entries.iter().copied());
    SessionContext::with_store(config, Arc::new(store)).expect("session context")
}

/// Context whose store already holds `token` and, optionally, `refresh_token`.
pub fn context_with_tokens(server: &MockServer, token: &str, refresh: Option<&str>) -> SessionContext {
    let mut entries = vec![(TOKEN_KEY, token)];
    if let Some(refresh) = refresh {
        entries.push((REFRESH_TOKEN_KEY, refresh));
    }
    context_with(config_for(server), &entries)
}

pub fn anonymous_context(server: &MockServer) -> SessionContext {
    context_with(config_for(server), &[])
}

pub fn short_refresh_timeout(server: &MockServer) -> ClientConfig {
    config_for(server).with_refresh_timeout(Duration::from_millis(200))
}
