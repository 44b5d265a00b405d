mod support;

use std::sync::Arc;
use std::time::Duration;

use common_auth::{RouteDecision, User, ROLE_ADMINISTRADOR, ROLE_ESTUDIANTE};
use httpmock::prelude::*;
use serde_json::json;
use session_client::{
    Credentials, FileSessionStore, RegistrationRequest, SessionContext, SessionStatus,
    REFRESH_TOKEN_KEY, TOKEN_KEY,
};
use support::{
    anonymous_context, api_path, auth_body, bearer, config_for, context_with_tokens, user_json,
};
use tempfile::tempdir;

#[tokio::test]
async fn login_success_authenticates_and_persists_tokens() {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(api_path("/auth/login/"))
                .json_body(json!({"username": "ana", "password": "clave-segura"}));
            then.status(200)
                .json_body(auth_body(user_json(5, "ana", ROLE_ESTUDIANTE), "abc", "r1"));
        })
        .await;

    let context = anonymous_context(&server);
    assert_eq!(context.start().await, SessionStatus::Anonymous);

    let mut updates = context.subscribe();
    let outcome = context
        .gateway
        .login(&Credentials::new("ana", "clave-segura"))
        .await;

    assert!(outcome.success, "{outcome:?}");
    assert_eq!(outcome.error, None);
    login.assert_hits_async(1).await;

    let session = context.session();
    assert_eq!(session.status(), SessionStatus::Authenticated);
    assert!(session.is_authenticated());
    assert!(!session.is_loading());
    assert_eq!(session.user().map(|user| user.username.as_str()), Some("ana"));
    assert_eq!(context.store.get(TOKEN_KEY).as_deref(), Some("abc"));
    assert_eq!(context.store.get(REFRESH_TOKEN_KEY).as_deref(), Some("r1"));
    assert_eq!(context.pipeline.default_authorization().as_deref(), Some("abc"));

    assert!(updates.has_changed().expect("machine alive"));
    assert_eq!(updates.borrow_and_update().status(), SessionStatus::Authenticated);
    assert!(context.has_role(ROLE_ESTUDIANTE));
    assert_eq!(context.guard_route(&[ROLE_ADMINISTRADOR]), RouteDecision::RedirectToHome);
}

#[tokio::test]
async fn login_rejection_surfaces_server_message() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(api_path("/auth/login/"));
            then.status(400)
                .json_body(json!({"non_field_errors": ["Credenciales inválidas."]}));
        })
        .await;

    let context = anonymous_context(&server);
    context.start().await;
    let outcome = context
        .gateway
        .login(&Credentials::new("ana", "incorrecta"))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("Credenciales inválidas."));

    let session = context.session();
    assert_eq!(session.status(), SessionStatus::Anonymous);
    assert!(!session.is_authenticated());
    assert!(!session.is_loading());
    assert_eq!(session.last_error(), Some("Credenciales inválidas."));
    assert_eq!(context.store.get(TOKEN_KEY), None);
}

#[tokio::test]
async fn login_without_message_uses_fallback_text() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(api_path("/auth/login/"));
            then.status(502).body("<html>bad gateway</html>");
        })
        .await;

    let context = anonymous_context(&server);
    context.start().await;
    let outcome = context.gateway.login(&Credentials::new("ana", "x")).await;

    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("Unable to sign in"));
}

#[tokio::test]
async fn register_signs_the_new_user_in() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path(api_path("/auth/register/"))
                .json_body_partial(r#"{"username": "nuevo", "rol": "estudiante"}"#);
            then.status(201)
                .json_body(auth_body(user_json(9, "nuevo", ROLE_ESTUDIANTE), "reg-access", "reg-refresh"));
        })
        .await;

    let context = anonymous_context(&server);
    context.start().await;

    let payload = RegistrationRequest {
        username: "nuevo".into(),
        email: "nuevo@example.edu".into(),
        password: "Clave123!".into(),
        password_confirm: "Clave123!".into(),
        first_name: "Nuevo".into(),
        last_name: "Usuario".into(),
        cedula: "87654321".into(),
        rol: ROLE_ESTUDIANTE.into(),
        ..RegistrationRequest::default()
    };
    let outcome = context.gateway.register(&payload).await;

    assert!(outcome.success, "{outcome:?}");
    assert_eq!(context.session().status(), SessionStatus::Authenticated);
    assert_eq!(context.store.get(TOKEN_KEY).as_deref(), Some("reg-access"));
}

#[tokio::test]
async fn logout_is_idempotent_from_any_state() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(api_path("/usuarios/perfil/"))
                .header("authorization", bearer("abc"));
            then.status(200).json_body(user_json(5, "ana", ROLE_ESTUDIANTE));
        })
        .await;

    let context = context_with_tokens(&server, "abc", Some("r1"));
    assert_eq!(context.start().await, SessionStatus::Authenticated);
    let generation = context.session().generation();

    context.gateway.logout();
    let session = context.session();
    assert_eq!(session.status(), SessionStatus::Anonymous);
    assert!(session.user().is_none());
    assert_eq!(session.generation(), generation + 1);
    assert_eq!(context.store.get(TOKEN_KEY), None);
    assert_eq!(context.store.get(REFRESH_TOKEN_KEY), None);
    assert_eq!(context.pipeline.default_authorization(), None);

    context.gateway.logout();
    assert_eq!(context.session().status(), SessionStatus::Anonymous);
    assert_eq!(context.store.get(TOKEN_KEY), None);
}

#[tokio::test]
async fn startup_without_token_skips_profile_call() {
    let server = MockServer::start_async().await;
    let profile = server
        .mock_async(|when, then| {
            when.method(GET).path(api_path("/usuarios/perfil/"));
            then.status(200).json_body(user_json(5, "ana", ROLE_ESTUDIANTE));
        })
        .await;

    let context = anonymous_context(&server);
    assert_eq!(context.start().await, SessionStatus::Anonymous);
    assert!(!context.session().is_loading());
    profile.assert_hits_async(0).await;

    // A second start is a no-op.
    assert_eq!(context.start().await, SessionStatus::Anonymous);
    profile.assert_hits_async(0).await;
}

#[tokio::test]
async fn failed_verification_clears_stored_tokens() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(api_path("/usuarios/perfil/"));
            then.status(500).json_body(json!({"detail": "Error interno"}));
        })
        .await;

    let context = context_with_tokens(&server, "abc", Some("r1"));
    assert_eq!(context.start().await, SessionStatus::Anonymous);

    let session = context.session();
    assert!(!session.is_authenticated());
    assert!(!session.is_loading());
    assert_eq!(context.store.get(TOKEN_KEY), None);
    assert_eq!(context.store.get(REFRESH_TOKEN_KEY), None);
}

#[tokio::test]
async fn verify_reports_profile_fetch_failure() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(api_path("/usuarios/perfil/"));
            then.status(401).json_body(json!({"detail": "Given token not valid"}));
        })
        .await;

    // No refresh token, so the 401 cannot be recovered.
    let context = context_with_tokens(&server, "abc", None);
    assert_eq!(context.start().await, SessionStatus::Anonymous);

    let err = context.gateway.verify().await.expect_err("profile rejected");
    assert!(matches!(err, common_auth::AuthError::ProfileFetchFailed(_)));
}

#[tokio::test]
async fn expired_token_on_startup_is_refreshed_and_profile_replayed() {
    let server = MockServer::start_async().await;
    let stale_profile = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(api_path("/usuarios/perfil/"))
                .header("authorization", bearer("abc"));
            then.status(401).json_body(json!({"detail": "Given token not valid"}));
        })
        .await;
    let fresh_profile = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(api_path("/usuarios/perfil/"))
                .header("authorization", bearer("def"));
            then.status(200).json_body(user_json(5, "ana", ROLE_ESTUDIANTE));
        })
        .await;
    let refresh = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(api_path("/auth/token/refresh/"))
                .json_body(json!({"refresh": "r1"}));
            then.status(200).json_body(json!({"access": "def"}));
        })
        .await;

    let context = context_with_tokens(&server, "abc", Some("r1"));
    assert_eq!(context.start().await, SessionStatus::Authenticated);

    stale_profile.assert_hits_async(1).await;
    refresh.assert_hits_async(1).await;
    fresh_profile.assert_hits_async(1).await;

    let session = context.session();
    assert!(session.is_authenticated());
    assert_eq!(session.access_token(), Some("def"));
    assert_eq!(context.store.get(TOKEN_KEY).as_deref(), Some("def"));
    assert_eq!(context.store.get(REFRESH_TOKEN_KEY).as_deref(), Some("r1"));
    assert_eq!(context.pipeline.default_authorization().as_deref(), Some("def"));
}

#[tokio::test]
async fn logout_during_login_discards_the_late_result() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(api_path("/auth/login/"));
            then.status(200)
                .delay(Duration::from_millis(300))
                .json_body(auth_body(user_json(5, "ana", ROLE_ESTUDIANTE), "late", "late-r"));
        })
        .await;

    let context = anonymous_context(&server);
    context.start().await;

    let credentials = Credentials::new("ana", "clave-segura");
    let (outcome, ()) = tokio::join!(context.gateway.login(&credentials), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        context.gateway.logout();
    });

    assert!(!outcome.success);
    assert_eq!(context.session().status(), SessionStatus::Anonymous);
    assert_eq!(context.store.get(TOKEN_KEY), None);
    assert_eq!(context.pipeline.default_authorization(), None);
}

#[tokio::test]
async fn change_password_reports_field_errors() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(api_path("/usuarios/perfil/"))
                .header("authorization", bearer("abc"));
            then.status(200).json_body(user_json(5, "ana", ROLE_ESTUDIANTE));
        })
        .await;
    let accepted = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(api_path("/usuarios/cambiar_password/"))
                .header("authorization", bearer("abc"))
                .json_body(json!({
                    "password_actual": "vieja",
                    "password_nueva": "Nueva123!",
                    "password_nueva_confirm": "Nueva123!"
                }));
            then.status(200)
                .json_body(json!({"message": "Contraseña actualizada exitosamente"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path(api_path("/usuarios/cambiar_password/"))
                .json_body_partial(r#"{"password_actual": "equivocada"}"#);
            then.status(400).json_body(json!({
                "password_actual": ["La contraseña actual es incorrecta."]
            }));
        })
        .await;

    let context = context_with_tokens(&server, "abc", Some("r1"));
    context.start().await;

    let outcome = context
        .gateway
        .change_password("vieja", "Nueva123!", "Nueva123!")
        .await;
    assert!(outcome.success, "{outcome:?}");
    accepted.assert_hits_async(1).await;

    let outcome = context
        .gateway
        .change_password("equivocada", "Nueva123!", "Nueva123!")
        .await;
    assert!(!outcome.success);
    assert_eq!(
        outcome.error.as_deref(),
        Some("password_actual: La contraseña actual es incorrecta.")
    );
    assert_eq!(context.session().status(), SessionStatus::Authenticated);
}

#[tokio::test]
async fn update_user_requires_a_signed_in_session() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(api_path("/usuarios/perfil/"));
            then.status(200).json_body(user_json(5, "ana", ROLE_ESTUDIANTE));
        })
        .await;

    let context = context_with_tokens(&server, "abc", None);
    context.start().await;

    let promoted = User::new(5, "ana", ROLE_ADMINISTRADOR);
    assert!(context.gateway.update_user(promoted));
    assert!(context.has_role(ROLE_ADMINISTRADOR));
    assert!(context.can_upload("practicas_profesionales"));

    context.gateway.logout();
    assert!(!context.gateway.update_user(User::new(5, "ana", ROLE_ESTUDIANTE)));
    assert!(context.user().is_none());
}

#[tokio::test]
async fn file_store_restores_session_in_a_new_context() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(api_path("/auth/login/"));
            then.status(200)
                .json_body(auth_body(user_json(5, "ana", ROLE_ESTUDIANTE), "abc", "r1"));
        })
        .await;
    let profile = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(api_path("/usuarios/perfil/"))
                .header("authorization", bearer("abc"));
            then.status(200).json_body(user_json(5, "ana", ROLE_ESTUDIANTE));
        })
        .await;

    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("session.json");

    let first = SessionContext::new(config_for(&server).with_store_path(&path)).expect("context");
    first.start().await;
    assert!(first.gateway.login(&Credentials::new("ana", "clave")).await.success);
    drop(first);

    let store = FileSessionStore::open(&path).expect("reopen store");
    let second = SessionContext::with_store(config_for(&server), Arc::new(store)).expect("context");
    assert_eq!(second.start().await, SessionStatus::Authenticated);
    profile.assert_hits_async(1).await;
    assert_eq!(second.user().map(|user| user.id), Some(5));
}
