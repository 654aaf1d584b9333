//! Dispatch facade and write forwarding
//!
//! [`RegistryNode`] is the operation surface the transport binds to. Every
//! call authorizes first, then dispatches:
//!
//! - reads execute against the local (possibly stale) projection on any
//!   node;
//! - mutations execute locally when the node's role is `Leading`, and are
//!   otherwise relayed verbatim to the current primary, whose result
//!   (success or failure) is returned to the caller unchanged.
//!
//! Forwarding is a blocking round-trip: the replica-side call suspends
//! until the primary acknowledges. Nothing here retries; if no primary is
//! known or reachable the caller gets `NoPrimaryAvailable` and owns the
//! retry policy.

use crate::auth::Gate;
use crate::error::{RegistryError, RegistryResult};
use crate::registry::{RegisteredVersion, SchemaRegistry};
use crate::replication::Role;
use crate::types::{CompatibilityLevel, Schema, SchemaId, SchemaType, SchemaVersion, SubjectVersion};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};
use vellum_core::{Operation, Principal, Resource};

// ============================================================================
// Write envelopes
// ============================================================================

/// A mutating operation, in the form relayed between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteRequest {
    Register {
        subject: String,
        schema_type: SchemaType,
        schema: String,
    },
    DeleteSubject {
        subject: String,
        permanent: bool,
    },
    SetCompatibility {
        subject: Option<String>,
        level: CompatibilityLevel,
    },
}

/// Result of a mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WriteOutcome {
    Registered { id: u32, version: u32 },
    Deleted { versions: Vec<u32> },
    CompatibilitySet { level: CompatibilityLevel },
}

/// A relayed write: the original request plus the principal the replica
/// authenticated. The primary re-runs authorization before executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardEnvelope {
    pub principal: Option<Principal>,
    pub request: WriteRequest,
}

/// Error payload relayed back from the primary. The HTTP status rides on
/// the response itself, so it is optional in the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardedError {
    pub error_code: u32,
    #[serde(default)]
    pub http_status: u16,
    pub message: String,
}

impl From<&RegistryError> for ForwardedError {
    fn from(e: &RegistryError) -> Self {
        Self {
            error_code: e.error_code(),
            http_status: e.http_status(),
            message: e.to_string(),
        }
    }
}

impl From<ForwardedError> for RegistryError {
    fn from(e: ForwardedError) -> Self {
        RegistryError::Forwarded {
            error_code: e.error_code,
            http_status: e.http_status,
            message: e.message,
        }
    }
}

// ============================================================================
// Forwarding collaborators
// ============================================================================

/// Relays a write to the current primary and returns its result verbatim.
#[async_trait]
pub trait WriteForwarder: Send + Sync {
    async fn forward(&self, envelope: ForwardEnvelope) -> RegistryResult<WriteOutcome>;
}

/// Resolves the current primary's base URL.
pub trait PrimaryResolver: Send + Sync {
    fn primary_url(&self) -> Option<String>;
}

/// Fixed primary address from configuration.
pub struct StaticPrimary(Option<String>);

impl StaticPrimary {
    pub fn new(url: Option<String>) -> Self {
        Self(url)
    }
}

impl PrimaryResolver for StaticPrimary {
    fn primary_url(&self) -> Option<String> {
        self.0.clone()
    }
}

/// HTTP forwarder posting the envelope to the primary's internal relay
/// endpoint.
pub struct HttpForwarder {
    resolver: Arc<dyn PrimaryResolver>,
    client: reqwest::Client,
}

impl HttpForwarder {
    pub fn new(resolver: Arc<dyn PrimaryResolver>) -> Self {
        Self {
            resolver,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl WriteForwarder for HttpForwarder {
    async fn forward(&self, envelope: ForwardEnvelope) -> RegistryResult<WriteOutcome> {
        let base = self
            .resolver
            .primary_url()
            .ok_or(RegistryError::NoPrimaryAvailable)?;
        let url = format!("{}/internal/forward", base.trim_end_matches('/'));

        debug!(url = %url, "forwarding write to primary");
        let response = self
            .client
            .post(&url)
            .json(&envelope)
            .send()
            .await
            .map_err(|_| RegistryError::NoPrimaryAvailable)?;

        if response.status().is_success() {
            let outcome: WriteOutcome = response
                .json()
                .await
                .map_err(|e| RegistryError::Serialization(e.to_string()))?;
            return Ok(outcome);
        }

        let status = response.status().as_u16();
        let mut error: ForwardedError = response.json().await.unwrap_or(ForwardedError {
            error_code: crate::error::error_codes::INTERNAL_ERROR,
            http_status: status,
            message: "primary returned an unreadable error".to_string(),
        });
        error.http_status = status;
        Err(error.into())
    }
}

/// In-process forwarder for nodes sharing one process (tests, embedded
/// clusters): relays straight to the primary node's handler.
pub struct LocalForwarder {
    primary: Arc<RegistryNode>,
}

impl LocalForwarder {
    pub fn new(primary: Arc<RegistryNode>) -> Self {
        Self { primary }
    }
}

#[async_trait]
impl WriteForwarder for LocalForwarder {
    async fn forward(&self, envelope: ForwardEnvelope) -> RegistryResult<WriteOutcome> {
        self.primary.handle_forwarded(envelope).await
    }
}

// ============================================================================
// Registry node
// ============================================================================

/// The authorized, role-aware operation surface of one cluster node.
pub struct RegistryNode {
    registry: SchemaRegistry,
    gate: Gate,
    role_rx: watch::Receiver<Role>,
    forwarder: Option<Arc<dyn WriteForwarder>>,
}

impl RegistryNode {
    pub fn new(
        registry: SchemaRegistry,
        gate: Gate,
        role_rx: watch::Receiver<Role>,
        forwarder: Option<Arc<dyn WriteForwarder>>,
    ) -> Self {
        Self {
            registry,
            gate,
            role_rx,
            forwarder,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Role snapshot for the current operation.
    pub fn role(&self) -> Role {
        *self.role_rx.borrow()
    }

    pub fn is_degraded(&self) -> bool {
        self.registry.is_degraded()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Fetch a subject version (or the latest). A denied principal sees the
    /// same `SubjectNotFound` as for a subject that does not exist.
    pub fn get_version(
        &self,
        principal: Option<&Principal>,
        subject: &str,
        version: SchemaVersion,
    ) -> RegistryResult<SubjectVersion> {
        self.gate.require(
            principal,
            Operation::Read,
            &Resource::Subject(subject),
            RegistryError::SubjectNotFound(subject.to_string()),
        )?;

        match self.registry.subject_version(subject, version)? {
            Some(found) => Ok(found),
            None => {
                if self.registry.list_versions(subject)?.is_some() {
                    Err(RegistryError::VersionNotFound {
                        subject: subject.to_string(),
                        version: version.0,
                    })
                } else {
                    Err(RegistryError::SubjectNotFound(subject.to_string()))
                }
            }
        }
    }

    /// List subjects the principal may read, preserving registration order.
    pub fn list_subjects(&self, principal: Option<&Principal>) -> RegistryResult<Vec<String>> {
        let all = self.registry.list_subjects()?;
        self.gate.filter_subjects(principal, all)
    }

    /// Live version numbers of a subject.
    pub fn list_versions(
        &self,
        principal: Option<&Principal>,
        subject: &str,
    ) -> RegistryResult<Vec<u32>> {
        self.gate.require(
            principal,
            Operation::Read,
            &Resource::Subject(subject),
            RegistryError::SubjectNotFound(subject.to_string()),
        )?;
        self.registry
            .list_versions(subject)?
            .ok_or_else(|| RegistryError::SubjectNotFound(subject.to_string()))
    }

    /// Fetch a schema by global id. Authorized against the set of subjects
    /// currently referencing the id through a live version: Read on at
    /// least one is required, otherwise the id reads as absent.
    pub fn get_schema_by_id(
        &self,
        principal: Option<&Principal>,
        id: SchemaId,
    ) -> RegistryResult<Schema> {
        let referencing = self.registry.referencing_subjects(id)?;
        if !self.gate.may_read_any(principal, &referencing)? {
            return Err(RegistryError::NotFound);
        }
        self.registry
            .schema_by_id(id)?
            .ok_or(RegistryError::NotFound)
    }

    /// Effective compatibility level: the subject override if one is set,
    /// else the global default. `subject: None` reads the global config.
    pub fn get_config(
        &self,
        principal: Option<&Principal>,
        subject: Option<&str>,
    ) -> RegistryResult<CompatibilityLevel> {
        match subject {
            Some(subject) => self.gate.screened(
                principal,
                Operation::Read,
                &Resource::Subject(subject),
                RegistryError::SubjectNotFound(subject.to_string()),
                || self.registry.effective_compatibility(subject).map(Some),
            ),
            None => self.gate.screened(
                principal,
                Operation::Read,
                &Resource::Config,
                RegistryError::NotFound,
                || self.registry.global_compatibility().map(Some),
            ),
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub async fn register(
        &self,
        principal: Option<&Principal>,
        subject: &str,
        schema_type: SchemaType,
        schema: &str,
    ) -> RegistryResult<RegisteredVersion> {
        let request = WriteRequest::Register {
            subject: subject.to_string(),
            schema_type,
            schema: schema.to_string(),
        };
        match self.dispatch_write(principal, request).await? {
            WriteOutcome::Registered { id, version } => Ok(RegisteredVersion {
                id: SchemaId::new(id),
                version: SchemaVersion::new(version),
            }),
            other => Err(unexpected_outcome(other)),
        }
    }

    pub async fn delete_subject(
        &self,
        principal: Option<&Principal>,
        subject: &str,
        permanent: bool,
    ) -> RegistryResult<Vec<u32>> {
        let request = WriteRequest::DeleteSubject {
            subject: subject.to_string(),
            permanent,
        };
        match self.dispatch_write(principal, request).await? {
            WriteOutcome::Deleted { versions } => Ok(versions),
            other => Err(unexpected_outcome(other)),
        }
    }

    pub async fn set_config(
        &self,
        principal: Option<&Principal>,
        subject: Option<&str>,
        level: CompatibilityLevel,
    ) -> RegistryResult<CompatibilityLevel> {
        let request = WriteRequest::SetCompatibility {
            subject: subject.map(|s| s.to_string()),
            level,
        };
        match self.dispatch_write(principal, request).await? {
            WriteOutcome::CompatibilitySet { level } => Ok(level),
            other => Err(unexpected_outcome(other)),
        }
    }

    /// Entry point for writes relayed from a replica. Authorization runs
    /// again here with the relayed principal; the request only executes if
    /// this node is currently leading (no forwarding chains).
    pub async fn handle_forwarded(
        &self,
        envelope: ForwardEnvelope,
    ) -> RegistryResult<WriteOutcome> {
        self.authorize_write(envelope.principal.as_ref(), &envelope.request)?;
        if !self.role().is_leading() {
            return Err(RegistryError::NoPrimaryAvailable);
        }
        self.execute_local(envelope.request).await
    }

    // ========================================================================
    // Internal
    // ========================================================================

    async fn dispatch_write(
        &self,
        principal: Option<&Principal>,
        request: WriteRequest,
    ) -> RegistryResult<WriteOutcome> {
        // Pre-check before any relay: a denied caller learns nothing about
        // the primary either.
        self.authorize_write(principal, &request)?;

        if self.role().is_leading() {
            return self.execute_local(request).await;
        }

        let Some(forwarder) = &self.forwarder else {
            return Err(RegistryError::NoPrimaryAvailable);
        };
        info!(request = request_kind(&request), "forwarding write to primary");
        forwarder
            .forward(ForwardEnvelope {
                principal: principal.cloned(),
                request,
            })
            .await
    }

    fn authorize_write(
        &self,
        principal: Option<&Principal>,
        request: &WriteRequest,
    ) -> RegistryResult<()> {
        match request {
            WriteRequest::Register { subject, .. }
            | WriteRequest::DeleteSubject { subject, .. } => self.gate.require(
                principal,
                Operation::Write,
                &Resource::Subject(subject),
                RegistryError::SubjectNotFound(subject.clone()),
            ),
            WriteRequest::SetCompatibility { subject, .. } => match subject {
                Some(subject) => self.gate.require(
                    principal,
                    Operation::Write,
                    &Resource::Subject(subject),
                    RegistryError::SubjectNotFound(subject.clone()),
                ),
                None => self.gate.require(
                    principal,
                    Operation::Write,
                    &Resource::Config,
                    RegistryError::NotFound,
                ),
            },
        }
    }

    async fn execute_local(&self, request: WriteRequest) -> RegistryResult<WriteOutcome> {
        match request {
            WriteRequest::Register {
                subject,
                schema_type,
                schema,
            } => {
                let registered = self
                    .registry
                    .register(&subject, schema_type, &schema)
                    .await?;
                Ok(WriteOutcome::Registered {
                    id: registered.id.0,
                    version: registered.version.0,
                })
            }
            WriteRequest::DeleteSubject { subject, permanent } => {
                let versions = self.registry.delete_subject(&subject, permanent).await?;
                Ok(WriteOutcome::Deleted { versions })
            }
            WriteRequest::SetCompatibility { subject, level } => {
                let level = self
                    .registry
                    .set_compatibility(subject.as_deref(), level)
                    .await?;
                Ok(WriteOutcome::CompatibilitySet { level })
            }
        }
    }
}

fn request_kind(request: &WriteRequest) -> &'static str {
    match request {
        WriteRequest::Register { .. } => "register",
        WriteRequest::DeleteSubject { .. } => "delete_subject",
        WriteRequest::SetCompatibility { .. } => "set_compatibility",
    }
}

fn unexpected_outcome(outcome: WriteOutcome) -> RegistryError {
    RegistryError::Internal(format!("unexpected write outcome: {outcome:?}"))
}
