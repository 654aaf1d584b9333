//! Schema registry engine
//!
//! [`SchemaRegistry`] is the node-local engine: reads against the
//! replicated projection, plus the primary-only mutation path. The
//! mutation path is a single logical writer: a `tokio::sync::Mutex`
//! serializes every mutation, and schema ids / version numbers are minted
//! only inside that critical section, so two racing registrations can
//! never observe the same counter value.
//!
//! Mutations never touch the projection directly. The writer appends
//! records to the replicated log and then waits for them to come back
//! through the node's own replay driver, which is the same apply path
//! replicas use. Racing mutations serialize behind the writer lock; the
//! later one is validated against the earlier one's outcome, and only a
//! genuine compatibility violation is surfaced.

use crate::compatibility::CompatibilityCheck;
use crate::error::{RegistryError, RegistryResult};
use crate::fingerprint::SchemaFingerprint;
use crate::replication::{spawn_replay, MutationLog, MutationRecord, StateMachine};
use crate::store::Projection;
use crate::types::{CompatibilityLevel, Schema, SchemaId, SchemaType, SchemaVersion, SubjectVersion};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Outcome of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredVersion {
    pub id: SchemaId,
    pub version: SchemaVersion,
}

/// Node-local schema registry engine.
pub struct SchemaRegistry {
    log: Arc<dyn MutationLog>,
    machine: Arc<StateMachine>,
    checker: Arc<dyn CompatibilityCheck>,
    /// Single-writer discipline for the mutation path
    writer: Mutex<()>,
    /// Schemas are immutable once minted, so this cache never invalidates
    by_id_cache: DashMap<u32, Schema>,
    replay: tokio::task::JoinHandle<()>,
}

impl SchemaRegistry {
    /// Create the engine and start its replay driver. Must be called on a
    /// tokio runtime.
    pub fn new(
        log: Arc<dyn MutationLog>,
        checker: Arc<dyn CompatibilityCheck>,
        default_compatibility: CompatibilityLevel,
    ) -> Self {
        let projection = Arc::new(Projection::new(default_compatibility));
        let machine = Arc::new(StateMachine::new(projection));
        let replay = spawn_replay(log.clone(), machine.clone());
        Self {
            log,
            machine,
            checker,
            writer: Mutex::new(()),
            by_id_cache: DashMap::new(),
            replay,
        }
    }

    pub fn projection(&self) -> &Arc<Projection> {
        self.machine.projection()
    }

    /// True once a replication fault has poisoned this node.
    pub fn is_degraded(&self) -> bool {
        self.projection().is_degraded()
    }

    // ========================================================================
    // Reads (served from the local projection, any role)
    // ========================================================================

    pub fn schema_by_id(&self, id: SchemaId) -> RegistryResult<Option<Schema>> {
        if self.projection().is_degraded() {
            return Err(RegistryError::Degraded);
        }
        if let Some(cached) = self.by_id_cache.get(&id.0) {
            return Ok(Some(cached.clone()));
        }
        let schema = self.projection().schema_by_id(id)?;
        if let Some(ref schema) = schema {
            self.by_id_cache.insert(id.0, schema.clone());
        }
        Ok(schema)
    }

    pub fn subject_version(
        &self,
        subject: &str,
        version: SchemaVersion,
    ) -> RegistryResult<Option<SubjectVersion>> {
        self.projection().subject_version(subject, version)
    }

    pub fn list_subjects(&self) -> RegistryResult<Vec<String>> {
        self.projection().list_subjects()
    }

    pub fn list_versions(&self, subject: &str) -> RegistryResult<Option<Vec<u32>>> {
        self.projection().list_versions(subject)
    }

    pub fn referencing_subjects(&self, id: SchemaId) -> RegistryResult<Vec<String>> {
        self.projection().referencing_subjects(id)
    }

    pub fn effective_compatibility(&self, subject: &str) -> RegistryResult<CompatibilityLevel> {
        self.projection().effective_compatibility(subject)
    }

    pub fn global_compatibility(&self) -> RegistryResult<CompatibilityLevel> {
        self.projection().global_compatibility()
    }

    // ========================================================================
    // Mutations (primary only; callers route through the dispatcher)
    // ========================================================================

    /// Register a schema under a subject.
    ///
    /// Idempotent twice over: content already minted anywhere reuses its
    /// global id, and content already live under this subject returns the
    /// existing (id, version) without appending anything.
    pub async fn register(
        &self,
        subject: &str,
        schema_type: SchemaType,
        schema: &str,
    ) -> RegistryResult<RegisteredVersion> {
        if subject.is_empty() {
            return Err(RegistryError::InvalidSchema(
                "subject name must not be empty".to_string(),
            ));
        }
        let canonical = validate_and_canonicalize(schema_type, schema)?;
        let fingerprint = SchemaFingerprint::compute(schema_type, &canonical);
        let identity_key = fingerprint.identity_key(schema_type);

        let _writer = self.writer.lock().await;
        self.sync_with_log().await?;
        let projection = self.projection();

        // Dedup: known content already live under this subject is a no-op.
        let existing_id = projection.id_for_identity(&identity_key)?;
        if let Some(id) = existing_id {
            if let Some(version) = projection.live_version_with_id(subject, id)? {
                debug!(
                    subject = %subject,
                    schema_id = %id,
                    version = version,
                    "registration matched existing live version"
                );
                return Ok(RegisteredVersion {
                    id,
                    version: SchemaVersion::new(version),
                });
            }
        }

        // Compatibility gate, before anything is appended.
        let level = projection.effective_compatibility(subject)?;
        let priors = projection.live_schema_contents(subject)?;
        let result = self
            .checker
            .check(level, schema_type, &canonical, &priors)?;
        if !result.is_compatible {
            return Err(RegistryError::IncompatibleSchema(
                result.messages.join("; "),
            ));
        }

        // Mint id (only when the content is new) and the next version.
        let id = match existing_id {
            Some(id) => id,
            None => {
                let id = projection.peek_next_schema_id()?;
                self.commit(MutationRecord::SchemaAdded {
                    id: id.0,
                    schema_type,
                    schema: canonical.clone(),
                    identity_key,
                })
                .await?;
                id
            }
        };

        let version = projection.peek_next_version(subject)?;
        self.commit(MutationRecord::VersionAppended {
            subject: subject.to_string(),
            version,
            schema_id: id.0,
        })
        .await?;

        info!(
            subject = %subject,
            schema_id = %id,
            version = version,
            "registered schema"
        );

        Ok(RegisteredVersion {
            id,
            version: SchemaVersion::new(version),
        })
    }

    /// Delete a subject. Soft delete tombstones every live version;
    /// permanent delete additionally drops the entries while retiring
    /// their numbers forever. Returns the deleted version numbers.
    pub async fn delete_subject(
        &self,
        subject: &str,
        permanent: bool,
    ) -> RegistryResult<Vec<u32>> {
        let _writer = self.writer.lock().await;
        self.sync_with_log().await?;

        let versions = self.projection().live_versions(subject)?;
        if versions.is_empty() {
            return Err(RegistryError::SubjectNotFound(subject.to_string()));
        }

        self.commit(MutationRecord::SubjectDeleted {
            subject: subject.to_string(),
            permanent,
        })
        .await?;

        info!(
            subject = %subject,
            permanent = permanent,
            versions = ?versions,
            "deleted subject"
        );
        Ok(versions)
    }

    /// Set the compatibility level for a subject, or the global default
    /// when `subject` is `None`.
    pub async fn set_compatibility(
        &self,
        subject: Option<&str>,
        level: CompatibilityLevel,
    ) -> RegistryResult<CompatibilityLevel> {
        let _writer = self.writer.lock().await;
        self.sync_with_log().await?;

        self.commit(MutationRecord::CompatibilitySet {
            subject: subject.map(|s| s.to_string()),
            level,
        })
        .await?;

        Ok(level)
    }

    // ========================================================================
    // Internal
    // ========================================================================

    /// Append one record and wait for it to come back through the replay
    /// driver, so the projection reflects it before the writer proceeds.
    async fn commit(&self, record: MutationRecord) -> RegistryResult<()> {
        let seq = self.log.append(record.encode()?).await?;
        self.machine.wait_for_applied(seq).await
    }

    /// Ensure the projection has caught up with the log tail. Relevant on
    /// a node that just became primary with replayed records still in
    /// flight.
    async fn sync_with_log(&self) -> RegistryResult<()> {
        let end = self.log.latest_seq().await?;
        if end > 0 {
            self.machine.wait_for_applied(end).await?;
        } else if self.projection().is_degraded() {
            return Err(RegistryError::Degraded);
        }
        Ok(())
    }
}

impl Drop for SchemaRegistry {
    fn drop(&mut self) {
        self.replay.abort();
    }
}

/// Validate schema syntax and produce the canonical content that identity
/// and storage use. Avro and JSON Schema bodies must parse as JSON and are
/// re-serialized to strip formatting differences; Protobuf is stored
/// verbatim (grammar-level parsing is out of scope).
fn validate_and_canonicalize(schema_type: SchemaType, schema: &str) -> RegistryResult<String> {
    match schema_type {
        SchemaType::Avro | SchemaType::Json => {
            let value: serde_json::Value = serde_json::from_str(schema)
                .map_err(|e| RegistryError::InvalidSchema(format!("invalid JSON: {e}")))?;
            Ok(serde_json::to_string(&value)?)
        }
        SchemaType::Protobuf => {
            if schema.trim().is_empty() {
                return Err(RegistryError::InvalidSchema(
                    "empty protobuf schema".to_string(),
                ));
            }
            Ok(schema.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compatibility::StructuralChecker;
    use crate::replication::MemoryLog;

    fn registry(level: CompatibilityLevel) -> SchemaRegistry {
        SchemaRegistry::new(
            Arc::new(MemoryLog::new()),
            Arc::new(StructuralChecker::new()),
            level,
        )
    }

    const STRING_SCHEMA: &str = r#"{"type": "string"}"#;
    const INT_SCHEMA: &str = r#"{"type": "int"}"#;

    #[tokio::test]
    async fn test_register_and_fetch() {
        let registry = registry(CompatibilityLevel::None);

        let registered = registry
            .register("users-value", SchemaType::Avro, STRING_SCHEMA)
            .await
            .unwrap();
        assert_eq!(registered.id, SchemaId::new(1));
        assert_eq!(registered.version, SchemaVersion::new(1));

        let schema = registry.schema_by_id(registered.id).unwrap().unwrap();
        assert_eq!(schema.schema_type, SchemaType::Avro);

        let latest = registry
            .subject_version("users-value", SchemaVersion::latest())
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, registered.id);
    }

    #[tokio::test]
    async fn test_dedup_across_subjects() {
        let registry = registry(CompatibilityLevel::None);

        let a = registry
            .register("subject-a", SchemaType::Avro, STRING_SCHEMA)
            .await
            .unwrap();
        // Formatting differences must not defeat deduplication
        let b = registry
            .register("subject-b", SchemaType::Avro, r#"{ "type" : "string" }"#)
            .await
            .unwrap();

        assert_eq!(a.id, b.id);
        assert_eq!(registry.list_subjects().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_same_type_different_content_distinct_ids() {
        let registry = registry(CompatibilityLevel::None);

        let a = registry
            .register("s1", SchemaType::Avro, STRING_SCHEMA)
            .await
            .unwrap();
        let b = registry
            .register("s2", SchemaType::Avro, INT_SCHEMA)
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_reregistration_is_idempotent() {
        let registry = registry(CompatibilityLevel::None);

        let first = registry
            .register("s", SchemaType::Avro, STRING_SCHEMA)
            .await
            .unwrap();
        let again = registry
            .register("s", SchemaType::Avro, STRING_SCHEMA)
            .await
            .unwrap();

        assert_eq!(first, again);
        assert_eq!(registry.list_versions("s").unwrap().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_version_monotonicity_across_soft_delete() {
        let registry = registry(CompatibilityLevel::None);

        registry
            .register("s", SchemaType::Avro, STRING_SCHEMA)
            .await
            .unwrap();
        registry
            .register("s", SchemaType::Avro, INT_SCHEMA)
            .await
            .unwrap();

        let deleted = registry.delete_subject("s", false).await.unwrap();
        assert_eq!(deleted, vec![1, 2]);

        // Re-registration continues the counter; numbers are never reused
        let revived = registry
            .register("s", SchemaType::Avro, STRING_SCHEMA)
            .await
            .unwrap();
        assert_eq!(revived.version, SchemaVersion::new(3));
        assert_eq!(registry.list_versions("s").unwrap().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_incompatible_schema_mints_nothing() {
        let registry = registry(CompatibilityLevel::Backward);

        registry
            .register("s", SchemaType::Avro, STRING_SCHEMA)
            .await
            .unwrap();
        let before = registry.projection().peek_next_schema_id().unwrap();

        let err = registry
            .register("s", SchemaType::Avro, INT_SCHEMA)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::IncompatibleSchema(_)));

        // No version and no id were created
        assert_eq!(registry.list_versions("s").unwrap().unwrap(), vec![1]);
        assert_eq!(
            registry.projection().peek_next_schema_id().unwrap(),
            before
        );
    }

    #[tokio::test]
    async fn test_subject_override_beats_global() {
        let registry = registry(CompatibilityLevel::Backward);

        registry
            .register("s", SchemaType::Avro, STRING_SCHEMA)
            .await
            .unwrap();
        registry
            .set_compatibility(Some("s"), CompatibilityLevel::None)
            .await
            .unwrap();

        // Would be rejected under the global BACKWARD default
        registry
            .register("s", SchemaType::Avro, INT_SCHEMA)
            .await
            .unwrap();
        assert_eq!(registry.list_versions("s").unwrap().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_delete_unknown_subject() {
        let registry = registry(CompatibilityLevel::None);
        let err = registry.delete_subject("ghost", false).await.unwrap_err();
        assert!(matches!(err, RegistryError::SubjectNotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_schema_rejected() {
        let registry = registry(CompatibilityLevel::None);
        let err = registry
            .register("s", SchemaType::Avro, "not json at all")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSchema(_)));

        let err = registry
            .register("s", SchemaType::Protobuf, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSchema(_)));
    }

    #[tokio::test]
    async fn test_concurrent_registrations_serialize() {
        let registry = Arc::new(registry(CompatibilityLevel::None));

        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .register(
                        &format!("subject-{i}"),
                        SchemaType::Avro,
                        &format!(r#"{{"type": "record", "name": "R{i}", "fields": []}}"#),
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut ids: Vec<u32> = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().id.0);
        }
        ids.sort_unstable();
        ids.dedup();
        // Eight distinct contents -> eight distinct ids, no counter races
        assert_eq!(ids.len(), 8);
    }
}
