use crate::session::{
    Clock, CredentialStore, PgCredentialStore, PgRefreshTokenLedger, RefreshTokenLedger,
    SessionManager, SystemClock, TokenCodec, TokenConfig,
};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware,
};
use sqlx::postgres::PgPoolOptions;
use std::{future::IntoFuture, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::oneshot};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, error, field, info, info_span, warn};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;

pub mod error;
pub mod gate;
pub(crate) mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

#[cfg(test)]
mod tests;

pub use gate::{GateConfig, RequestGate};
pub use openapi::openapi;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Routes behind the request gate, with request ids and tracing.
///
/// The gate wraps every route and the fallback, so unknown paths outside the
/// public prefixes answer 401 before 404.
pub fn app(sessions: Arc<SessionManager>, request_gate: Arc<RequestGate>) -> Router {
    let (router, _openapi) = router().split_for_parts();
    router
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(request_gate, gate::enforce))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID_HEADER),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID_HEADER,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(sessions)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to connect to the database or to start the server
pub async fn new(
    port: u16,
    dsn: String,
    token_config: TokenConfig,
    gate_config: GateConfig,
    shutdown_timeout: Duration,
) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let credentials: Arc<dyn CredentialStore> = Arc::new(PgCredentialStore::new(pool.clone()));
    let ledger: Arc<dyn RefreshTokenLedger> = Arc::new(PgRefreshTokenLedger::new(pool.clone()));
    let codec = Arc::new(TokenCodec::new(token_config, clock.clone()));
    let sessions = Arc::new(SessionManager::new(
        credentials.clone(),
        ledger,
        codec.clone(),
        clock,
    ));
    let request_gate = Arc::new(RequestGate::new(codec, credentials, gate_config));

    let app = app(sessions, request_gate).layer(Extension(pool));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    let (draining_tx, draining_rx) = oneshot::channel();
    let server = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Gracefully shutdown");
            let _ = draining_tx.send(());
        })
        .into_future();

    // In-flight requests get `shutdown_timeout` to finish once a signal arrives.
    tokio::select! {
        result = server => result.context("server error")?,
        () = async {
            if draining_rx.await.is_ok() {
                tokio::time::sleep(shutdown_timeout).await;
            } else {
                std::future::pending::<()>().await;
            }
        } => {
            warn!(
                "In-flight requests did not drain within {}s",
                shutdown_timeout.as_secs()
            );
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Failed to register SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id,
        principal_id = field::Empty
    )
}
