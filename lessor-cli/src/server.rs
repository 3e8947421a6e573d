use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::sync::watch;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;

use lessor_core::config::ManagerConfig;
use lessor_core::context::RequestContext;
use lessor_core::error::{ConfigError, RpcError, StoreError};
use lessor_core::identity::LocalIdentityProvider;
use lessor_core::infrastructure::{shared, SharedStore};
use lessor_core::infrastructure_in_memory::InMemoryLeaseStore;
use lessor_core::manager::{CreateLeaseRequest, ManagerService, UpdateLeaseRequest};
use lessor_core::plugin::{PluginCatalog, PluginInfo};
use lessor_core::rpc::{self, ManagerRpcClient, MessageBus};
use lessor_core::types::Lease;

use crate::handlers::*;

/// Requests handled at once before callers queue
const MAX_IN_FLIGHT: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub manager: ManagerRpcClient,
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("storage: {0}")]
    Storage(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Messaging(#[from] RpcError),

    #[error("server: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn run(
    host: &str,
    port: u16,
    storage: &str,
    config: ManagerConfig,
) -> Result<(), StartupError> {
    let store = open_store(storage)?;
    let identity = Arc::new(LocalIdentityProvider::new());
    let manager =
        ManagerService::from_config(&config, &PluginCatalog::builtin(), store, identity)?;
    tracing::info!(
        plugins = manager.list_plugins().len(),
        topic = %config.manager_rpc_topic,
        "Manager configured"
    );

    let scheduler = manager.scheduler(config.event_period());
    if config.recover_in_progress_on_start {
        let recovered = scheduler.recover_stalled().await?;
        if recovered > 0 {
            tracing::warn!(recovered, "Stalled events moved to ERROR");
        }
    }
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    let bus = MessageBus::new();
    let client = start_manager(&bus, &config.manager_rpc_topic, manager)?;
    let app = router(AppState { manager: client });

    let addr = format!("{}:{}", host, port);
    tracing::info!("Lessor server starting on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_task.await {
        tracing::error!(error = %e, "Event scheduler task failed");
    }
    served.map_err(StartupError::from)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

/// Put `manager` behind `topic` on `bus` and return a client for it.
pub fn start_manager(
    bus: &MessageBus,
    topic: &str,
    manager: ManagerService,
) -> Result<ManagerRpcClient, RpcError> {
    let inbox = bus.listen(topic)?;
    tokio::spawn(rpc::serve(manager, inbox));
    bus.client(topic)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/leases", get(list_leases).post(create_lease))
        .route(
            "/v1/leases/{id}",
            get(get_lease).put(update_lease).delete(delete_lease),
        )
        .route("/v1/plugins", get(list_plugins))
        .layer(middleware::from_fn(context_middleware))
        .layer(CorsLayer::permissive())
        .layer(ConcurrencyLimitLayer::new(MAX_IN_FLIGHT))
        .with_state(state)
}

// ─── Context Middleware ─────────────────────────────────────────────────────

async fn context_middleware(mut request: Request, next: Next) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    match context_from_headers(request.headers()) {
        Ok(ctx) => {
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        Err(msg) => {
            tracing::warn!(path = %request.uri().path(), reason = %msg, "Unauthenticated request");
            (StatusCode::UNAUTHORIZED, Json(ApiResponse::<()>::err(msg))).into_response()
        }
    }
}

// ─── Handlers ───────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::ok(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        manager_topic: state.manager.topic().to_string(),
    }))
}

async fn list_leases(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<ApiResponse<Vec<Lease>>>, ApiError> {
    let leases = state.manager.list_leases(&ctx).await?;
    Ok(Json(ApiResponse::ok(leases)))
}

async fn create_lease(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<CreateLeaseRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Lease>>), ApiError> {
    let lease = state.manager.create_lease(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(lease))))
}

async fn get_lease(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Lease>>, ApiError> {
    let lease = state.manager.get_lease(&ctx, &id).await?;
    Ok(Json(ApiResponse::ok(lease)))
}

async fn update_lease(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(values): Json<serde_json::Value>,
) -> Result<Json<ApiResponse<Lease>>, ApiError> {
    let values = UpdateLeaseRequest::from_json(values)?;
    let lease = state.manager.update_lease(&ctx, &id, values).await?;
    Ok(Json(ApiResponse::ok(lease)))
}

/// Accepted, not done: deletion runs in the manager after this returns.
async fn delete_lease(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ApiResponse<String>>), ApiError> {
    state.manager.delete_lease(&ctx, &id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::ok(format!("Lease '{}' scheduled for deletion", id))),
    ))
}

async fn list_plugins(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<ApiResponse<Vec<PluginInfo>>>, ApiError> {
    let plugins = state.manager.list_plugins(&ctx).await?;
    Ok(Json(ApiResponse::ok(plugins)))
}

// ─── Storage Backend Selection ──────────────────────────────────────────────

fn open_store(storage: &str) -> Result<SharedStore, StartupError> {
    if storage == "memory" {
        tracing::info!("Storage backend: in-memory (leases will not persist)");
        return Ok(shared(InMemoryLeaseStore::new()));
    }

    let Some(path) = storage.strip_prefix("sqlite:") else {
        return Err(StartupError::Storage(format!(
            "unknown backend '{}', use 'memory' or 'sqlite:<path>'",
            storage
        )));
    };

    #[cfg(feature = "sqlite")]
    {
        tracing::info!("Storage backend: SQLite ({})", path);
        let store = lessor_core::infrastructure_sqlite::SqliteLeaseStore::open(path)?;
        Ok(shared(store))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        Err(StartupError::Storage(format!(
            "SQLite storage requested for '{}' but the `sqlite` feature is not enabled",
            path
        )))
    }
}
