//! Local read-only HTTPS query surface
//!
//! Enforcers call these endpoints after receiving `ALL_EVENTS` to pull the
//! full state. Every response is `{"list": [...]}`.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tracing::{info, instrument};

use crate::store::types::ListResponse;
use crate::store::{ApplicationKeyMapping, ApplicationMapping, ResolvedApplication, StateStore, Subscription};
use crate::{Error, Result};

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Store the handlers read from
    pub store: Arc<StateStore>,
}

/// Build the query router
pub fn router(store: Arc<StateStore>) -> Router {
    Router::new()
        .route("/applications", get(applications))
        .route("/subscriptions", get(subscriptions))
        .route("/applicationmappings", get(application_mappings))
        .route("/applicationkeymappings", get(application_key_mappings))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(AppState { store })
}

#[instrument(skip(state))]
async fn applications(State(state): State<AppState>) -> Json<ListResponse<ResolvedApplication>> {
    Json(state.store.resolved_applications().into())
}

#[instrument(skip(state))]
async fn subscriptions(State(state): State<AppState>) -> Json<ListResponse<Subscription>> {
    Json(state.store.subscriptions().into())
}

#[instrument(skip(state))]
async fn application_mappings(State(state): State<AppState>) -> Json<ListResponse<ApplicationMapping>> {
    Json(state.store.application_mappings().into())
}

#[instrument(skip(state))]
async fn application_key_mappings(
    State(state): State<AppState>,
) -> Json<ListResponse<ApplicationKeyMapping>> {
    Json(state.store.key_mappings().into())
}

/// Serve the query surface over TLS until `handle` is shut down
pub async fn serve(
    store: Arc<StateStore>,
    addr: SocketAddr,
    cert_path: &Path,
    key_path: &Path,
    handle: Handle,
) -> Result<()> {
    let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|e| Error::config(format!("TLS config error: {e}")))?;

    info!(%addr, "Starting HTTPS query server");

    axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(router(store).into_make_service())
        .await
        .map_err(|e| Error::internal_with_context(format!("server error: {e}"), "http"))
}
