//! End-to-end flows through the router with in-memory stores.

use super::{GateConfig, RequestGate, app};
use crate::session::{
    CredentialStore, Role, Roles, TokenKind,
    manager::tests::{Harness, NOW, harness},
};
use anyhow::{Context, Result};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{
        Method, Request, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

fn test_app(h: &Harness) -> Router {
    test_app_with(h, GateConfig::default())
}

fn test_app_with(h: &Harness, config: GateConfig) -> Router {
    let gate = Arc::new(RequestGate::new(
        h.codec.clone(),
        h.credentials.clone(),
        config,
    ));
    app(h.manager.clone(), gate)
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    authorization: Option<&str>,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(value) = authorization {
        builder = builder.header(AUTHORIZATION, value);
    }
    let request = match body {
        Some(body) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

async fn sign_up(app: &Router, email: &str, password: &str) -> Result<StatusCode> {
    let body = json!({ "email": email, "password": password });
    let (status, _) = send(app, Method::POST, "/api/auth/signup", None, Some(body)).await?;
    Ok(status)
}

async fn sign_in(app: &Router, email: &str, password: &str) -> Result<(StatusCode, Value)> {
    let body = json!({ "email": email, "password": password });
    send(app, Method::POST, "/api/auth/signin", None, Some(body)).await
}

fn token(body: &Value, field: &str) -> Result<String> {
    body["data"][field]
        .as_str()
        .map(str::to_string)
        .with_context(|| format!("missing {field} in {body}"))
}

#[tokio::test]
async fn sign_up_twice_conflicts() -> Result<()> {
    let h = harness();
    let app = test_app(&h);

    let body = json!({ "email": "a@x.com", "password": "pw" });
    let (status, created) =
        send(&app, Method::POST, "/api/auth/signup", None, Some(body.clone())).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created, json!({ "message": "user has been signed up" }));

    let (status, conflict) = send(&app, Method::POST, "/api/auth/signup", None, Some(body)).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(conflict["message"], "email adress is already registered");
    Ok(())
}

#[tokio::test]
async fn sign_up_validation_errors_are_400() -> Result<()> {
    let h = harness();
    let app = test_app(&h);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/auth/signup",
        None,
        Some(json!({ "email": "a@x.com" })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "email and password are required");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/auth/signup",
        None,
        Some(json!("not an object")),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());
    Ok(())
}

#[tokio::test]
async fn sign_in_wrong_then_right_password() -> Result<()> {
    let h = harness();
    let app = test_app(&h);
    assert_eq!(sign_up(&app, "a@x.com", "pw").await?, StatusCode::CREATED);

    let (status, body) = sign_in(&app, "a@x.com", "wrong").await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "message": "Unauthorized" }));

    let (status, body) = sign_in(&app, "a@x.com", "pw").await?;
    assert_eq!(status, StatusCode::OK);
    let access = token(&body, "access_token")?;
    let refresh = token(&body, "refresh_token")?;
    assert!(!access.is_empty());
    assert!(!refresh.is_empty());
    assert_ne!(access, refresh);

    let (status, _) = sign_in(&app, "nobody@x.com", "pw").await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn refresh_rotates_and_rejects_replay() -> Result<()> {
    let h = harness();
    let app = test_app(&h);
    sign_up(&app, "a@x.com", "pw").await?;
    let (_, body) = sign_in(&app, "a@x.com", "pw").await?;
    let old_refresh = token(&body, "refresh_token")?;

    let request = json!({ "refresh_token": old_refresh });
    let (status, rotated) = send(
        &app,
        Method::POST,
        "/api/auth/refresh",
        None,
        Some(request.clone()),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let new_refresh = token(&rotated, "refresh_token")?;
    assert_ne!(new_refresh, old_refresh);

    let (status, body) = send(&app, Method::POST, "/api/auth/refresh", None, Some(request)).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Unauthorized");
    Ok(())
}

#[tokio::test]
async fn protected_path_requires_valid_access_token() -> Result<()> {
    let h = harness();
    let app = test_app(&h);
    sign_up(&app, "a@x.com", "pw").await?;
    let (_, body) = sign_in(&app, "a@x.com", "pw").await?;
    let access = token(&body, "access_token")?;
    let refresh = token(&body, "refresh_token")?;

    let (status, _) = send(&app, Method::GET, "/api/me", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, Method::GET, "/api/me", Some(&access), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "scheme is required");

    let (status, body) = send(&app, Method::GET, "/api/me", Some(&bearer(&refresh)), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Unauthorized");

    let (status, body) = send(&app, Method::GET, "/api/me", Some(&bearer(&access)), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], "a@x.com");
    assert_eq!(body["data"]["roles"], json!(["customer"]));

    h.clock.advance(h.codec.config().access_ttl_seconds());
    let (status, _) = send(&app, Method::GET, "/api/me", Some(&bearer(&access)), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn admin_path_requires_admin_role() -> Result<()> {
    let h = harness();
    let app = test_app(&h);
    sign_up(&app, "a@x.com", "pw").await?;
    sign_up(&app, "root@x.com", "pw").await?;
    let target = h
        .credentials
        .find_by_email("a@x.com")
        .await?
        .context("customer missing")?;
    let root = h
        .credentials
        .find_by_email("root@x.com")
        .await?
        .context("admin missing")?;
    h.credentials
        .update_roles(root.id, Roles::DEFAULT.with(Role::Admin))
        .await?;

    let uri = format!("/api/admin/users/{}/roles", target.id);
    let promote = json!({ "roles": ["customer", "staff"] });

    let (_, body) = sign_in(&app, "a@x.com", "pw").await?;
    let customer_access = bearer(&token(&body, "access_token")?);
    let (status, body) = send(
        &app,
        Method::PUT,
        &uri,
        Some(&customer_access),
        Some(promote.clone()),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Forbidden");

    let (_, body) = sign_in(&app, "root@x.com", "pw").await?;
    let admin_access = bearer(&token(&body, "access_token")?);
    let (status, body) = send(&app, Method::PUT, &uri, Some(&admin_access), Some(promote)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["roles"], json!(["customer", "staff"]));

    let missing = format!("/api/admin/users/{}/roles", Uuid::new_v4());
    let (status, _) = send(
        &app,
        Method::PUT,
        &missing,
        Some(&admin_access),
        Some(json!({ "roles": ["customer"] })),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn extra_admin_prefix_keeps_role_update_admin_only() -> Result<()> {
    let h = harness();
    let app = test_app_with(&h, GateConfig::default().with_admin_prefixes(["/api/reports"]));
    sign_up(&app, "a@x.com", "pw").await?;
    let me = h
        .credentials
        .find_by_email("a@x.com")
        .await?
        .context("customer missing")?;
    let (_, body) = sign_in(&app, "a@x.com", "pw").await?;
    let access = bearer(&token(&body, "access_token")?);

    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/api/admin/users/{}/roles", me.id),
        Some(&access),
        Some(json!({ "roles": ["customer", "admin"] })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, Method::GET, "/api/reports", Some(&access), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let unchanged = h
        .credentials
        .find_by_id(me.id)
        .await?
        .context("customer missing")?;
    assert!(!unchanged.roles.contains(Role::Admin));
    Ok(())
}

#[tokio::test]
async fn deleted_principal_is_unauthorized() -> Result<()> {
    let h = harness();
    let app = test_app(&h);
    sign_up(&app, "a@x.com", "pw").await?;
    let (_, body) = sign_in(&app, "a@x.com", "pw").await?;
    let access = bearer(&token(&body, "access_token")?);
    let principal = h
        .credentials
        .find_by_email("a@x.com")
        .await?
        .context("principal missing")?;

    h.credentials.remove(principal.id);
    let (status, _) = send(&app, Method::GET, "/api/me", Some(&access), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn token_for_unknown_subject_is_unauthorized() -> Result<()> {
    let h = harness();
    let app = test_app(&h);
    let forged = h.codec.issue(Uuid::new_v4(), TokenKind::Access, NOW)?;

    let (status, _) = send(&app, Method::GET, "/api/me", Some(&bearer(&forged.raw)), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn sign_out_revokes_refresh_token() -> Result<()> {
    let h = harness();
    let app = test_app(&h);
    sign_up(&app, "a@x.com", "pw").await?;
    let (_, body) = sign_in(&app, "a@x.com", "pw").await?;
    let access = bearer(&token(&body, "access_token")?);
    let refresh = token(&body, "refresh_token")?;

    let (status, body) = send(&app, Method::DELETE, "/api/me/session", Some(&access), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "signed out");

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/auth/refresh",
        None,
        Some(json!({ "refresh_token": refresh })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn unknown_route_is_gated_before_404() -> Result<()> {
    let h = harness();
    let app = test_app(&h);
    sign_up(&app, "a@x.com", "pw").await?;
    let (_, body) = sign_in(&app, "a@x.com", "pw").await?;
    let access = bearer(&token(&body, "access_token")?);

    let (status, _) = send(&app, Method::GET, "/api/tickets", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, Method::GET, "/api/tickets", Some(&access), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "route not found");
    Ok(())
}

#[tokio::test]
async fn request_id_is_assigned_and_propagated() -> Result<()> {
    let h = harness();
    let app = test_app(&h);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/me").body(Body::empty())?)
        .await?;
    assert!(response.headers().contains_key("x-request-id"));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/me")
                .header("x-request-id", "fixed-id")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok()),
        Some("fixed-id")
    );
    Ok(())
}
