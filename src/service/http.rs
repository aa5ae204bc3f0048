//! HTTP front-end.
//!
//! One GET endpoint does the real work: `/v1/q/<hex>` runs the
//! submitted bytes through the battery and the uniqueness store and
//! answers with the literal `"true"` or `"false"`. Successful answers
//! carry an `X-Entropy` header of 32 fresh random bytes the caller
//! can fold into their own generator state.

use super::ratelimit::{ip_key, RateLimiter};
use super::usage::PersistentUsage;
use super::{Orchestrator, ServiceError, Submission};
use crate::config::ServerConfig;
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use rand_core::{OsRng, RngCore};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while running the HTTP service.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),

    #[error("server error: {0}")]
    Server(String),
}

/// Shared state behind the router.
pub struct AppState {
    /// The submission pipeline.
    pub orchestrator: Orchestrator,
    /// Counter store backing the usage endpoint.
    pub usage: Arc<PersistentUsage>,
    /// Per-caller request limiter.
    pub limiter: Arc<dyn RateLimiter>,
    /// Limits and bind address.
    pub config: ServerConfig,
}

/// Optional caller identification on a submission.
#[derive(Debug, Deserialize)]
struct SubmitParams {
    #[serde(default)]
    id: String,
    #[serde(default)]
    tag: String,
}

/// Runs the service until a shutdown signal arrives.
pub async fn serve(state: AppState) -> Result<(), ServerError> {
    let bind_addr = state.config.bind_addr;
    let app = router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "service listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| ServerError::Server(e.to_string()))?;

    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/q/:payload", get(submit_handler))
        .route("/v1/usage", get(usage_handler))
        .route("/health", get(health_handler))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => tracing::warn!(error = %e, "failed to install shutdown handler"),
    }
}

/// Handler for the submission endpoint.
async fn submit_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(payload): Path<String>,
    Query(params): Query<SubmitParams>,
) -> impl IntoResponse {
    // Registered callers get a far higher budget: their id ties abuse
    // back to someone.
    let max = if params.id.is_empty() {
        state.config.anonymous_limit
    } else {
        state.config.registered_limit
    };
    let window = Duration::from_secs(state.config.limit_window_secs);
    let key = ip_key("q", &addr.ip().to_string());
    match state.limiter.should_limit(&key, max, window) {
        Ok(false) => {}
        Ok(true) => {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [("content-type", "text/plain".to_owned())],
                "Request limit exceeded".to_owned(),
            )
                .into_response();
        }
        Err(e) => {
            tracing::error!(error = %e, "rate limiter failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "RateLimit error").into_response();
        }
    }

    let submission = Submission {
        payload_hex: payload,
        user_id: params.id,
        tag: params.tag,
    };
    // The check blocks on storage I/O; keep it off the async workers.
    let result =
        tokio::task::spawn_blocking(move || state.orchestrator.submit(&submission)).await;

    match result {
        Ok(Ok(outcome)) => (
            StatusCode::OK,
            [
                ("content-type", "application/json".to_owned()),
                ("x-entropy", entropy_token()),
            ],
            outcome.as_body().to_owned(),
        )
            .into_response(),
        Ok(Err(e)) => service_error_response(e).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "submission task panicked");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

/// Handler for the usage-counters endpoint.
async fn usage_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let usage = state.usage.clone();
    match tokio::task::spawn_blocking(move || usage.counts()).await {
        Ok(Ok(counts)) => {
            let map: BTreeMap<String, i64> =
                counts.into_iter().map(|c| (c.label, c.count)).collect();
            Json(map).into_response()
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "failed to read usage counters");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "usage task panicked");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

/// Handler for the health endpoint.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// 32 fresh random bytes for the `X-Entropy` response header.
///
/// Callers are encouraged to mix this into their own PRNG state; it
/// costs the server nothing and every bit helps a client with a thin
/// entropy supply.
fn entropy_token() -> String {
    let mut b = [0u8; 32];
    OsRng.fill_bytes(&mut b);
    hex::encode(b)
}

fn service_error_response(e: ServiceError) -> (StatusCode, String) {
    match e {
        ServiceError::InvalidHex | ServiceError::PayloadTooShort => {
            (StatusCode::BAD_REQUEST, e.to_string())
        }
        ServiceError::Store(inner) => {
            tracing::error!(error = %inner, "check aborted by storage failure");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entropy_token_shape() {
        let token = entropy_token();
        assert_eq!(token.len(), 64);
        assert!(hex::decode(&token).is_ok());

        // Fresh randomness every call.
        assert_ne!(token, entropy_token());
    }

    #[test]
    fn test_client_errors_are_bad_requests() {
        let (status, _) = service_error_response(ServiceError::InvalidHex);
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = service_error_response(ServiceError::PayloadTooShort);
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_storage_errors_are_internal_and_opaque() {
        let err = ServiceError::Store(crate::store::StoreError::Storage(
            crate::store::StorageError::Backend("secret path /var/db leaked?".into()),
        ));
        let (status, body) = service_error_response(err);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "internal error");
    }
}
