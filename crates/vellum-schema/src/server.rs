//! HTTP server for the schema registry
//!
//! Confluent-compatible REST surface over a [`RegistryNode`]. Client-facing
//! routes pass through the Basic-auth middleware first (a no-op when no
//! auth file is configured); handlers then hand the resolved principal to
//! the node, which applies authorization and primary-forwarding.
//!
//! `/internal/forward` is the cluster-internal relay target replicas post
//! mutations to. It carries the already-authenticated principal in the
//! body; the primary re-runs authorization before executing.

use crate::auth::{auth_middleware, AuthState, Gate, RequestPrincipal};
use crate::error::{error_codes, RegistryError};
use crate::forward::{ForwardEnvelope, RegistryNode, WriteOutcome};
use crate::replication::Role;
use crate::types::{CompatibilityLevel, SchemaId, SchemaVersion};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared server state
pub struct ServerState {
    pub node: Arc<RegistryNode>,
}

/// Schema registry HTTP server
pub struct SchemaServer {
    state: Arc<ServerState>,
    auth_state: Arc<AuthState>,
}

impl SchemaServer {
    pub fn new(node: Arc<RegistryNode>, realm: impl Into<String>) -> Self {
        let auth_state = Arc::new(AuthState::new(node.gate().clone(), realm));
        Self {
            state: Arc::new(ServerState { node }),
            auth_state,
        }
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        // Client-facing API: every route passes the credential middleware.
        let api = Router::new()
            // Schemas
            .route("/schemas/ids/:id", get(get_schema_by_id))
            // Subjects
            .route("/subjects", get(list_subjects))
            .route("/subjects/:subject", delete(delete_subject))
            .route("/subjects/:subject/versions", get(list_subject_versions))
            .route("/subjects/:subject/versions", post(register_schema))
            .route(
                "/subjects/:subject/versions/:version",
                get(get_subject_version),
            )
            // Config
            .route("/config", get(get_global_config))
            .route("/config", put(update_global_config))
            .route("/config/:subject", get(get_subject_config))
            .route("/config/:subject", put(update_subject_config))
            .layer(middleware::from_fn_with_state(
                self.auth_state.clone(),
                auth_middleware,
            ));

        // Probes stay reachable without credentials, and the internal
        // relay authenticates through the principal in its body (the
        // cluster-internal channel itself is secured at the transport
        // layer, outside this crate).
        let unauthenticated = Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/internal/forward", post(internal_forward));

        Router::new()
            .merge(api)
            .merge(unauthenticated)
            .with_state(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server until the listener fails
    pub async fn run(self, addr: SocketAddr) -> anyhow::Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("schema registry listening on {}", addr);
        axum::serve(listener, router).await?;
        Ok(())
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Serialize)]
struct RootResponse {
    version: &'static str,
    role: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
struct RegisterSchemaRequest {
    schema: String,
    #[serde(rename = "schemaType", default)]
    schema_type: Option<String>,
}

#[derive(Serialize)]
struct RegisterSchemaResponse {
    id: u32,
}

#[derive(Serialize)]
struct SchemaResponse {
    schema: String,
    #[serde(rename = "schemaType")]
    schema_type: String,
}

#[derive(Serialize)]
struct SubjectVersionResponse {
    subject: String,
    version: u32,
    id: u32,
    schema: String,
    #[serde(rename = "schemaType")]
    schema_type: String,
}

#[derive(Serialize)]
struct ConfigResponse {
    #[serde(rename = "compatibilityLevel")]
    compatibility_level: String,
}

#[derive(Deserialize)]
struct ConfigRequest {
    compatibility: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error_code: u32,
    message: String,
}

#[derive(Deserialize)]
struct DeleteParams {
    #[serde(default)]
    permanent: bool,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn error_response(e: RegistryError) -> HandlerError {
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorResponse {
            error_code: e.error_code(),
            message: e.to_string(),
        }),
    )
}

fn parse_schema_type(
    raw: Option<&str>,
) -> Result<crate::types::SchemaType, HandlerError> {
    match raw {
        None => Ok(crate::types::SchemaType::Avro),
        Some(s) => s
            .parse()
            .map_err(|_| error_response(RegistryError::InvalidSchema(format!(
                "unknown schema type: {s}"
            )))),
    }
}

fn parse_version(raw: &str) -> Result<SchemaVersion, HandlerError> {
    raw.parse().map_err(|_| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse {
                error_code: error_codes::INVALID_VERSION,
                message: format!("Invalid version: {raw}"),
            }),
        )
    })
}

fn parse_level(raw: &str) -> Result<CompatibilityLevel, HandlerError> {
    raw.parse().map_err(|_| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse {
                error_code: error_codes::INVALID_COMPATIBILITY_LEVEL,
                message: format!("Invalid compatibility level: {raw}"),
            }),
        )
    })
}

// ============================================================================
// Handlers
// ============================================================================

async fn root_handler(State(state): State<Arc<ServerState>>) -> Json<RootResponse> {
    Json(RootResponse {
        version: env!("CARGO_PKG_VERSION"),
        role: state.node.role().to_string(),
    })
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Liveness probe - is the process alive?
async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe - a degraded projection must not serve traffic
async fn readiness_handler(State(state): State<Arc<ServerState>>) -> StatusCode {
    if state.node.is_degraded() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn get_schema_by_id(
    State(state): State<Arc<ServerState>>,
    Extension(RequestPrincipal(principal)): Extension<RequestPrincipal>,
    Path(id): Path<u32>,
) -> Result<Json<SchemaResponse>, HandlerError> {
    let schema = state
        .node
        .get_schema_by_id(principal.as_ref(), SchemaId::new(id))
        .map_err(error_response)?;
    Ok(Json(SchemaResponse {
        schema: schema.schema,
        schema_type: schema.schema_type.to_string(),
    }))
}

async fn list_subjects(
    State(state): State<Arc<ServerState>>,
    Extension(RequestPrincipal(principal)): Extension<RequestPrincipal>,
) -> Result<Json<Vec<String>>, HandlerError> {
    state
        .node
        .list_subjects(principal.as_ref())
        .map(Json)
        .map_err(error_response)
}

async fn list_subject_versions(
    State(state): State<Arc<ServerState>>,
    Extension(RequestPrincipal(principal)): Extension<RequestPrincipal>,
    Path(subject): Path<String>,
) -> Result<Json<Vec<u32>>, HandlerError> {
    state
        .node
        .list_versions(principal.as_ref(), &subject)
        .map(Json)
        .map_err(error_response)
}

async fn register_schema(
    State(state): State<Arc<ServerState>>,
    Extension(RequestPrincipal(principal)): Extension<RequestPrincipal>,
    Path(subject): Path<String>,
    Json(request): Json<RegisterSchemaRequest>,
) -> Result<Json<RegisterSchemaResponse>, HandlerError> {
    let schema_type = parse_schema_type(request.schema_type.as_deref())?;
    let registered = state
        .node
        .register(principal.as_ref(), &subject, schema_type, &request.schema)
        .await
        .map_err(error_response)?;
    Ok(Json(RegisterSchemaResponse {
        id: registered.id.0,
    }))
}

async fn get_subject_version(
    State(state): State<Arc<ServerState>>,
    Extension(RequestPrincipal(principal)): Extension<RequestPrincipal>,
    Path((subject, version)): Path<(String, String)>,
) -> Result<Json<SubjectVersionResponse>, HandlerError> {
    let version = parse_version(&version)?;
    let found = state
        .node
        .get_version(principal.as_ref(), &subject, version)
        .map_err(error_response)?;
    Ok(Json(SubjectVersionResponse {
        subject: found.subject.0,
        version: found.version.0,
        id: found.id.0,
        schema: found.schema,
        schema_type: found.schema_type.to_string(),
    }))
}

async fn delete_subject(
    State(state): State<Arc<ServerState>>,
    Extension(RequestPrincipal(principal)): Extension<RequestPrincipal>,
    Path(subject): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<Vec<u32>>, HandlerError> {
    state
        .node
        .delete_subject(principal.as_ref(), &subject, params.permanent)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn get_global_config(
    State(state): State<Arc<ServerState>>,
    Extension(RequestPrincipal(principal)): Extension<RequestPrincipal>,
) -> Result<Json<ConfigResponse>, HandlerError> {
    let level = state
        .node
        .get_config(principal.as_ref(), None)
        .map_err(error_response)?;
    Ok(Json(ConfigResponse {
        compatibility_level: level.to_string(),
    }))
}

async fn update_global_config(
    State(state): State<Arc<ServerState>>,
    Extension(RequestPrincipal(principal)): Extension<RequestPrincipal>,
    Json(request): Json<ConfigRequest>,
) -> Result<Json<ConfigResponse>, HandlerError> {
    let level = parse_level(&request.compatibility)?;
    let level = state
        .node
        .set_config(principal.as_ref(), None, level)
        .await
        .map_err(error_response)?;
    Ok(Json(ConfigResponse {
        compatibility_level: level.to_string(),
    }))
}

async fn get_subject_config(
    State(state): State<Arc<ServerState>>,
    Extension(RequestPrincipal(principal)): Extension<RequestPrincipal>,
    Path(subject): Path<String>,
) -> Result<Json<ConfigResponse>, HandlerError> {
    let level = state
        .node
        .get_config(principal.as_ref(), Some(&subject))
        .map_err(error_response)?;
    Ok(Json(ConfigResponse {
        compatibility_level: level.to_string(),
    }))
}

async fn update_subject_config(
    State(state): State<Arc<ServerState>>,
    Extension(RequestPrincipal(principal)): Extension<RequestPrincipal>,
    Path(subject): Path<String>,
    Json(request): Json<ConfigRequest>,
) -> Result<Json<ConfigResponse>, HandlerError> {
    let level = parse_level(&request.compatibility)?;
    let level = state
        .node
        .set_config(principal.as_ref(), Some(&subject), level)
        .await
        .map_err(error_response)?;
    Ok(Json(ConfigResponse {
        compatibility_level: level.to_string(),
    }))
}

/// Cluster-internal relay target. The envelope carries the principal the
/// replica authenticated; authorization runs again on this node.
async fn internal_forward(
    State(state): State<Arc<ServerState>>,
    Json(envelope): Json<ForwardEnvelope>,
) -> Result<Json<WriteOutcome>, HandlerError> {
    state
        .node
        .handle_forwarded(envelope)
        .await
        .map(Json)
        .map_err(error_response)
}

// ============================================================================
// Node assembly
// ============================================================================

/// Build a full node (engine + gate + forwarder) from configuration parts.
/// Shared by the binary and integration tests.
pub fn build_node(
    log: Arc<dyn crate::replication::MutationLog>,
    checker: Arc<dyn crate::compatibility::CompatibilityCheck>,
    config: &crate::config::RegistryConfig,
    gate: Gate,
) -> (Arc<RegistryNode>, tokio::sync::watch::Sender<Role>) {
    use crate::forward::{HttpForwarder, StaticPrimary};
    use crate::registry::SchemaRegistry;
    use crate::replication::role_channel;

    let registry = SchemaRegistry::new(log, checker, config.compatibility);
    let (role_tx, role_rx) = role_channel(config.role.into());
    let forwarder: Option<Arc<dyn crate::forward::WriteForwarder>> =
        config.primary_url.as_ref().map(|url| {
            Arc::new(HttpForwarder::new(Arc::new(StaticPrimary::new(Some(
                url.clone(),
            ))))) as Arc<dyn crate::forward::WriteForwarder>
        });
    let node = Arc::new(RegistryNode::new(registry, gate, role_rx, forwarder));
    (node, role_tx)
}
