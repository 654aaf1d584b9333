//! # Vellum Schema Registry
//!
//! A replicated, access-controlled schema registry for event streaming
//! platforms.
//!
//! ## Features
//!
//! - **Multiple schema formats**: Avro, JSON Schema, Protobuf
//! - **Content-addressed identity**: byte-equivalent schemas share one
//!   global id across all subjects
//! - **Schema evolution**: backward, forward, full and transitive
//!   compatibility checking before any version is committed
//! - **Primary/replica clustering**: one write-accepting primary, replicas
//!   serving reads from a replayed mutation log and forwarding writes
//! - **Role-based authorization**: per-subject ACLs with existence
//!   non-disclosure: a denied lookup is indistinguishable from a missing
//!   resource
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Vellum Schema Registry                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │  REST API (Confluent-compatible)                             │
//! │  ├── POST /subjects/{subject}/versions                       │
//! │  ├── GET  /schemas/ids/{id}                                  │
//! │  ├── GET  /subjects/{subject}/versions/{version}             │
//! │  ├── GET/PUT /config, /config/{subject}                      │
//! │  └── GET  /health, /health/live, /health/ready               │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Authorization (Basic auth → principal → ACL gate)           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Dispatch (reads local; writes local iff leading,            │
//! │  otherwise forwarded verbatim to the primary)                │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Replicated state machine over an ordered mutation log       │
//! │  └── projection: identity table + subject/version store      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation becomes a record in an ordered, replayable log; primary
//! and replicas fold the same records through the same apply path, so a
//! replica that has replayed up to a write's sequence number answers reads
//! identically to the primary.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vellum_schema::auth::Gate;
//! use vellum_schema::compatibility::StructuralChecker;
//! use vellum_schema::forward::RegistryNode;
//! use vellum_schema::registry::SchemaRegistry;
//! use vellum_schema::replication::{role_channel, MemoryLog, Role};
//! use vellum_schema::types::{CompatibilityLevel, SchemaType, SchemaVersion};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = SchemaRegistry::new(
//!     Arc::new(MemoryLog::new()),
//!     Arc::new(StructuralChecker::new()),
//!     CompatibilityLevel::Backward,
//! );
//! let (_role_tx, role_rx) = role_channel(Role::Leading);
//! let node = RegistryNode::new(registry, Gate::open(), role_rx, None);
//!
//! let avro = r#"{"type": "record", "name": "User", "fields": [{"name": "id", "type": "long"}]}"#;
//! let registered = node.register(None, "user-value", SchemaType::Avro, avro).await?;
//! let fetched = node.get_version(None, "user-value", SchemaVersion::latest())?;
//! assert_eq!(fetched.id, registered.id);
//! # Ok(())
//! # }
//! ```
//!
//! The registry stores and serves schema definitions; it does not
//! encode/decode payloads against them; that is the producers' and
//! consumers' job.

pub mod auth;
pub mod compatibility;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod forward;
pub mod registry;
pub mod replication;
pub mod server;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use auth::Gate;
pub use compatibility::{CompatibilityCheck, CompatibilityResult, StructuralChecker};
pub use config::{NodeRole, RegistryConfig};
pub use error::{error_codes, RegistryError, RegistryResult};
pub use fingerprint::SchemaFingerprint;
pub use forward::{
    ForwardEnvelope, HttpForwarder, LocalForwarder, PrimaryResolver, RegistryNode, StaticPrimary,
    WriteForwarder, WriteOutcome, WriteRequest,
};
pub use registry::{RegisteredVersion, SchemaRegistry};
pub use replication::{
    role_channel, MemoryLog, MutationLog, MutationRecord, Role, StateMachine,
};
pub use server::SchemaServer;
pub use store::Projection;
pub use types::{
    CompatibilityLevel, Schema, SchemaId, SchemaType, SchemaVersion, Subject, SubjectVersion,
};
