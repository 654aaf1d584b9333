//! Authorization glue for registry operations
//!
//! `vellum-core` answers the raw allow/deny question; this module applies
//! registry policy on top:
//!
//! - **Authenticated gate**: with auth enabled, every operation needs a
//!   verified principal. A missing principal is always `Unauthenticated`
//!   (401, error code 40101), never disguised as anything else.
//! - **Existence non-disclosure**: a denied single-resource read reports
//!   the *same* error as a genuinely absent resource. All lookups funnel
//!   through one combinator ([`Gate::screened`]) so the property holds for
//!   every current and future read path rather than being re-implemented
//!   per call site.
//! - **By-id authorization**: fetching a schema by global id is allowed iff
//!   the principal can read at least one subject holding a live version of
//!   that id.
//!
//! The HTTP middleware lives here too: Basic credentials are verified
//! against the credential table before a request reaches any handler.

use crate::error::{RegistryError, RegistryResult};
use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use vellum_core::{AuthDirectory, Decision, Operation, Principal, Resource};

// ============================================================================
// Gate
// ============================================================================

/// Authorization gate for registry operations.
///
/// Constructed once per node. `open()` disables authorization entirely
/// (development mode, matching a server started without an auth file);
/// `with_directory` enforces it.
#[derive(Clone, Default)]
pub struct Gate {
    directory: Option<Arc<AuthDirectory>>,
}

impl Gate {
    /// No authentication configured: every request is permitted.
    pub fn open() -> Self {
        Self { directory: None }
    }

    pub fn with_directory(directory: Arc<AuthDirectory>) -> Self {
        Self {
            directory: Some(directory),
        }
    }

    pub fn directory(&self) -> Option<&Arc<AuthDirectory>> {
        self.directory.as_ref()
    }

    /// Raw decision for an operation. `Err(Unauthenticated)` when auth is
    /// enabled and no principal was established.
    pub fn authorize(
        &self,
        principal: Option<&Principal>,
        operation: Operation,
        resource: &Resource<'_>,
    ) -> RegistryResult<Decision> {
        let Some(directory) = &self.directory else {
            return Ok(Decision::Allow);
        };
        let Some(principal) = principal else {
            return Err(RegistryError::Unauthenticated);
        };
        Ok(directory.engine().authorize(principal, operation, resource))
    }

    /// Pre-check for mutations: deny is reported as the supplied absence
    /// error, exactly like the target not existing.
    pub fn require(
        &self,
        principal: Option<&Principal>,
        operation: Operation,
        resource: &Resource<'_>,
        absent: RegistryError,
    ) -> RegistryResult<()> {
        match self.authorize(principal, operation, resource)? {
            Decision::Allow => Ok(()),
            Decision::Deny => Err(absent),
        }
    }

    /// Single-resource read decorator. Deny and absence collapse into the
    /// same `absent` error value, so a caller cannot distinguish "exists
    /// but hidden" from "does not exist".
    pub fn screened<T>(
        &self,
        principal: Option<&Principal>,
        operation: Operation,
        resource: &Resource<'_>,
        absent: RegistryError,
        lookup: impl FnOnce() -> RegistryResult<Option<T>>,
    ) -> RegistryResult<T> {
        match self.authorize(principal, operation, resource)? {
            Decision::Allow => lookup()?.ok_or(absent),
            Decision::Deny => Err(absent),
        }
    }

    /// Order-preserving listing filter.
    pub fn filter_subjects(
        &self,
        principal: Option<&Principal>,
        subjects: Vec<String>,
    ) -> RegistryResult<Vec<String>> {
        let Some(directory) = &self.directory else {
            return Ok(subjects);
        };
        let Some(principal) = principal else {
            return Err(RegistryError::Unauthenticated);
        };
        Ok(directory.engine().filter_subjects(
            principal,
            Operation::Read,
            subjects.iter().map(|s| s.as_str()),
        ))
    }

    /// May the principal read *any* of the given subjects? Drives by-id
    /// lookups, where access to one referencing subject suffices.
    pub fn may_read_any(
        &self,
        principal: Option<&Principal>,
        subjects: &[String],
    ) -> RegistryResult<bool> {
        let Some(directory) = &self.directory else {
            return Ok(true);
        };
        let Some(principal) = principal else {
            return Err(RegistryError::Unauthenticated);
        };
        Ok(subjects.iter().any(|s| {
            directory
                .engine()
                .authorize(principal, Operation::Read, &Resource::Subject(s))
                .is_allowed()
        }))
    }
}

// ============================================================================
// HTTP Basic authentication middleware
// ============================================================================

/// Shared middleware state.
pub struct AuthState {
    pub gate: Gate,
    pub realm: String,
}

impl AuthState {
    pub fn new(gate: Gate, realm: impl Into<String>) -> Self {
        Self {
            gate,
            realm: realm.into(),
        }
    }
}

/// The principal resolved for a request, stored as a request extension.
/// `None` means anonymous (only possible with auth disabled).
#[derive(Debug, Clone)]
pub struct RequestPrincipal(pub Option<Principal>);

#[derive(Debug, Serialize)]
struct AuthErrorBody {
    error_code: u32,
    message: String,
}

/// Verify Basic credentials before any handler runs.
///
/// With auth enabled, a request without an `Authorization` header, or with
/// one that fails verification, is rejected with 401 and a Basic
/// challenge. Handlers downstream always find a `RequestPrincipal`
/// extension.
pub async fn auth_middleware(
    State(state): State<Arc<AuthState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(directory) = state.gate.directory().cloned() else {
        request
            .extensions_mut()
            .insert(RequestPrincipal(None));
        return next.run(request).await;
    };

    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let principal = match header {
        Some(header) if header.starts_with("Basic ") => {
            match parse_basic_auth(header, &directory) {
                Ok(principal) => principal,
                Err(message) => {
                    warn!(message = %message, "authentication failed");
                    return unauthorized_response(&state.realm, message);
                }
            }
        }
        Some(_) => {
            return unauthorized_response(
                &state.realm,
                "Invalid Authorization header format. Supported: Basic".to_string(),
            )
        }
        None => {
            return unauthorized_response(&state.realm, "Authentication required".to_string())
        }
    };

    debug!(principal = %principal.identity, "authenticated");
    request
        .extensions_mut()
        .insert(RequestPrincipal(Some(principal)));
    next.run(request).await
}

fn parse_basic_auth(header: &str, directory: &AuthDirectory) -> Result<Principal, String> {
    let encoded = header.trim_start_matches("Basic ");
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| "Invalid Basic auth encoding".to_string())?;
    let credentials =
        String::from_utf8(decoded).map_err(|_| "Invalid credentials encoding".to_string())?;
    let (username, password) = credentials
        .split_once(':')
        .ok_or_else(|| "Invalid Basic auth format".to_string())?;

    directory
        .authenticate(username, password)
        .map_err(|_| "Invalid credentials".to_string())
}

fn unauthorized_response(realm: &str, message: String) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(
            "WWW-Authenticate",
            format!("Basic realm=\"{}\"", realm),
        )],
        Json(AuthErrorBody {
            error_code: crate::error::error_codes::UNAUTHENTICATED,
            message,
        }),
    )
        .into_response()
}
