//! Replicated projection: schema identity table + subject/version store
//!
//! The projection is the in-memory state every node serves reads from. It
//! is mutated exclusively by applying replicated mutation records through
//! the state machine (see [`crate::replication`]); there is no direct
//! mutation side channel. Primary and replicas therefore converge from
//! identical ordered histories.
//!
//! Reads take a consistent snapshot under a read lock and never block each
//! other. After a replication fault the projection is marked degraded and
//! every read fails rather than serving a potentially divergent view.

use crate::error::{RegistryError, RegistryResult};
use crate::replication::MutationRecord;
use crate::types::{CompatibilityLevel, Schema, SchemaId, SchemaVersion, SubjectVersion};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// One version entry of a subject. Tombstoned entries stay in place so
/// version numbering never regresses.
#[derive(Debug, Clone)]
struct VersionEntry {
    version: u32,
    schema_id: u32,
    deleted: bool,
}

/// Per-subject state. `next_version` is a monotonic counter independent of
/// the entry list: permanent deletion removes entries but the counter keeps
/// counting, so retired version numbers are never reused.
#[derive(Debug, Default)]
struct SubjectState {
    next_version: u32,
    versions: Vec<VersionEntry>,
}

impl SubjectState {
    fn live(&self) -> impl Iterator<Item = &VersionEntry> {
        self.versions.iter().filter(|v| !v.deleted)
    }

    fn has_live(&self) -> bool {
        self.versions.iter().any(|v| !v.deleted)
    }
}

#[derive(Debug)]
struct ProjectionState {
    /// Next global schema id to mint
    next_schema_id: u32,
    /// Schemas by id
    schemas: HashMap<u32, Schema>,
    /// Identity key (type-qualified fingerprint) -> schema id
    identities: HashMap<String, u32>,
    /// Subjects in insertion order of first registration
    subject_order: Vec<String>,
    /// Subject name -> state
    subjects: HashMap<String, SubjectState>,
    /// Per-subject compatibility overrides
    subject_compatibility: HashMap<String, CompatibilityLevel>,
    /// Global default compatibility
    global_compatibility: CompatibilityLevel,
}

/// The node-local projection of the replicated log.
pub struct Projection {
    state: RwLock<ProjectionState>,
    last_applied: AtomicU64,
    degraded: AtomicBool,
}

impl Projection {
    pub fn new(default_compatibility: CompatibilityLevel) -> Self {
        Self {
            state: RwLock::new(ProjectionState {
                next_schema_id: 1,
                schemas: HashMap::new(),
                identities: HashMap::new(),
                subject_order: Vec::new(),
                subjects: HashMap::new(),
                subject_compatibility: HashMap::new(),
                global_compatibility: default_compatibility,
            }),
            last_applied: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
        }
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Sequence number of the last applied record (0 = none yet).
    pub fn last_applied(&self) -> u64 {
        self.last_applied.load(Ordering::SeqCst)
    }

    pub(crate) fn set_last_applied(&self, seq: u64) {
        self.last_applied.store(seq, Ordering::SeqCst);
    }

    /// Permanently mark this projection as unusable after a replication
    /// fault. All subsequent reads fail with `Degraded`.
    pub(crate) fn mark_degraded(&self) {
        warn!("projection marked degraded; refusing further reads");
        self.degraded.store(true, Ordering::SeqCst);
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn read_guard(&self) -> RegistryResult<parking_lot::RwLockReadGuard<'_, ProjectionState>> {
        if self.is_degraded() {
            return Err(RegistryError::Degraded);
        }
        Ok(self.state.read())
    }

    // ========================================================================
    // Identity table reads
    // ========================================================================

    /// Look up a schema by global id.
    pub fn schema_by_id(&self, id: SchemaId) -> RegistryResult<Option<Schema>> {
        Ok(self.read_guard()?.schemas.get(&id.0).cloned())
    }

    /// Resolve an identity key to an existing schema id.
    pub fn id_for_identity(&self, identity_key: &str) -> RegistryResult<Option<SchemaId>> {
        Ok(self
            .read_guard()?
            .identities
            .get(identity_key)
            .copied()
            .map(SchemaId::new))
    }

    /// The id the next minted schema will receive.
    pub fn peek_next_schema_id(&self) -> RegistryResult<SchemaId> {
        Ok(SchemaId::new(self.read_guard()?.next_schema_id))
    }

    /// Subjects holding a live version that references the schema id, in
    /// subject insertion order. Drives by-id authorization.
    pub fn referencing_subjects(&self, id: SchemaId) -> RegistryResult<Vec<String>> {
        let state = self.read_guard()?;
        Ok(state
            .subject_order
            .iter()
            .filter(|name| {
                state
                    .subjects
                    .get(*name)
                    .map(|s| s.live().any(|v| v.schema_id == id.0))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    // ========================================================================
    // Subject/version reads
    // ========================================================================

    /// All subjects with at least one live version, in insertion order of
    /// first registration.
    pub fn list_subjects(&self) -> RegistryResult<Vec<String>> {
        let state = self.read_guard()?;
        Ok(state
            .subject_order
            .iter()
            .filter(|name| {
                state
                    .subjects
                    .get(*name)
                    .map(|s| s.has_live())
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    /// Live version numbers of a subject, ascending. `None` when the
    /// subject has no live versions.
    pub fn list_versions(&self, subject: &str) -> RegistryResult<Option<Vec<u32>>> {
        let state = self.read_guard()?;
        let Some(subject_state) = state.subjects.get(subject) else {
            return Ok(None);
        };
        if !subject_state.has_live() {
            return Ok(None);
        }
        Ok(Some(subject_state.live().map(|v| v.version).collect()))
    }

    /// A specific live version of a subject (or the latest).
    pub fn subject_version(
        &self,
        subject: &str,
        version: SchemaVersion,
    ) -> RegistryResult<Option<SubjectVersion>> {
        let state = self.read_guard()?;
        let Some(subject_state) = state.subjects.get(subject) else {
            return Ok(None);
        };
        let entry = if version.is_latest() {
            subject_state.live().last()
        } else {
            subject_state.live().find(|v| v.version == version.0)
        };
        let Some(entry) = entry else {
            return Ok(None);
        };
        let schema = state.schemas.get(&entry.schema_id).ok_or_else(|| {
            RegistryError::Internal(format!(
                "projection references unknown schema id {}",
                entry.schema_id
            ))
        })?;
        Ok(Some(SubjectVersion {
            subject: subject.into(),
            version: SchemaVersion::new(entry.version),
            id: SchemaId::new(entry.schema_id),
            schema_type: schema.schema_type,
            schema: schema.schema.clone(),
        }))
    }

    /// Live version number bound to the given schema id under a subject,
    /// if any. Makes re-registration of identical content idempotent.
    pub fn live_version_with_id(
        &self,
        subject: &str,
        id: SchemaId,
    ) -> RegistryResult<Option<u32>> {
        let state = self.read_guard()?;
        Ok(state.subjects.get(subject).and_then(|s| {
            s.live()
                .find(|v| v.schema_id == id.0)
                .map(|v| v.version)
        }))
    }

    /// Contents of all live versions of a subject, oldest first, for
    /// compatibility checking.
    pub fn live_schema_contents(&self, subject: &str) -> RegistryResult<Vec<String>> {
        let state = self.read_guard()?;
        let Some(subject_state) = state.subjects.get(subject) else {
            return Ok(Vec::new());
        };
        subject_state
            .live()
            .map(|v| {
                state
                    .schemas
                    .get(&v.schema_id)
                    .map(|s| s.schema.clone())
                    .ok_or_else(|| {
                        RegistryError::Internal(format!(
                            "projection references unknown schema id {}",
                            v.schema_id
                        ))
                    })
            })
            .collect()
    }

    /// Version number the next registration under this subject will get.
    pub fn peek_next_version(&self, subject: &str) -> RegistryResult<u32> {
        let state = self.read_guard()?;
        Ok(state
            .subjects
            .get(subject)
            .map(|s| s.next_version.max(1))
            .unwrap_or(1))
    }

    /// Live version numbers of a subject regardless of tombstones, for
    /// delete responses.
    pub fn live_versions(&self, subject: &str) -> RegistryResult<Vec<u32>> {
        Ok(self.list_versions(subject)?.unwrap_or_default())
    }

    // ========================================================================
    // Compatibility config reads
    // ========================================================================

    pub fn global_compatibility(&self) -> RegistryResult<CompatibilityLevel> {
        Ok(self.read_guard()?.global_compatibility)
    }

    pub fn subject_compatibility_override(
        &self,
        subject: &str,
    ) -> RegistryResult<Option<CompatibilityLevel>> {
        Ok(self
            .read_guard()?
            .subject_compatibility
            .get(subject)
            .copied())
    }

    /// Subject override if set, else the global default.
    pub fn effective_compatibility(&self, subject: &str) -> RegistryResult<CompatibilityLevel> {
        let state = self.read_guard()?;
        Ok(state
            .subject_compatibility
            .get(subject)
            .copied()
            .unwrap_or(state.global_compatibility))
    }

    // ========================================================================
    // Mutation (state-machine apply path only)
    // ========================================================================

    /// Fold one mutation record into the projection. Only the replication
    /// state machine calls this; sequencing is validated there.
    pub(crate) fn apply(&self, record: &MutationRecord) {
        let mut state = self.state.write();
        match record {
            MutationRecord::SchemaAdded {
                id,
                schema_type,
                schema,
                identity_key,
            } => {
                state.identities.insert(identity_key.clone(), *id);
                state.schemas.insert(
                    *id,
                    Schema::new(
                        SchemaId::new(*id),
                        *schema_type,
                        schema.clone(),
                        identity_key.clone(),
                    ),
                );
                if *id >= state.next_schema_id {
                    state.next_schema_id = *id + 1;
                }
                debug!(schema_id = id, "applied schema");
            }
            MutationRecord::VersionAppended {
                subject,
                version,
                schema_id,
            } => {
                if !state.subjects.contains_key(subject) {
                    state.subject_order.push(subject.clone());
                }
                let subject_state = state.subjects.entry(subject.clone()).or_default();
                subject_state.versions.push(VersionEntry {
                    version: *version,
                    schema_id: *schema_id,
                    deleted: false,
                });
                subject_state.next_version = version + 1;
                info!(
                    subject = %subject,
                    version = version,
                    schema_id = schema_id,
                    "applied subject version"
                );
            }
            MutationRecord::SubjectDeleted { subject, permanent } => {
                if let Some(subject_state) = state.subjects.get_mut(subject) {
                    if *permanent {
                        subject_state.versions.clear();
                    } else {
                        for entry in subject_state.versions.iter_mut() {
                            entry.deleted = true;
                        }
                    }
                    info!(subject = %subject, permanent = permanent, "applied subject delete");
                }
            }
            MutationRecord::CompatibilitySet { subject, level } => match subject {
                Some(subject) => {
                    state.subject_compatibility.insert(subject.clone(), *level);
                    info!(subject = %subject, level = %level, "applied subject compatibility");
                }
                None => {
                    state.global_compatibility = *level;
                    info!(level = %level, "applied global compatibility");
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SchemaType;

    fn projection() -> Projection {
        Projection::new(CompatibilityLevel::Backward)
    }

    fn add_schema(p: &Projection, id: u32, content: &str) {
        p.apply(&MutationRecord::SchemaAdded {
            id,
            schema_type: SchemaType::Avro,
            schema: content.to_string(),
            identity_key: format!("AVRO:fp-{id}"),
        });
    }

    fn append_version(p: &Projection, subject: &str, version: u32, schema_id: u32) {
        p.apply(&MutationRecord::VersionAppended {
            subject: subject.to_string(),
            version,
            schema_id,
        });
    }

    #[test]
    fn test_identity_table_roundtrip() {
        let p = projection();
        add_schema(&p, 1, r#"{"type":"string"}"#);

        assert_eq!(
            p.id_for_identity("AVRO:fp-1").unwrap(),
            Some(SchemaId::new(1))
        );
        assert_eq!(p.peek_next_schema_id().unwrap(), SchemaId::new(2));
        let schema = p.schema_by_id(SchemaId::new(1)).unwrap().unwrap();
        assert_eq!(schema.schema, r#"{"type":"string"}"#);
        assert!(p.schema_by_id(SchemaId::new(7)).unwrap().is_none());
    }

    #[test]
    fn test_subject_insertion_order() {
        let p = projection();
        add_schema(&p, 1, "{}");
        add_schema(&p, 2, "{}");
        append_version(&p, "zeta", 1, 1);
        append_version(&p, "alpha", 1, 2);
        append_version(&p, "zeta", 2, 2);

        assert_eq!(
            p.list_subjects().unwrap(),
            vec!["zeta".to_string(), "alpha".to_string()]
        );
    }

    #[test]
    fn test_version_lookup_and_latest() {
        let p = projection();
        add_schema(&p, 1, r#"{"type":"string"}"#);
        add_schema(&p, 2, r#"{"type":"int"}"#);
        append_version(&p, "s", 1, 1);
        append_version(&p, "s", 2, 2);

        let v1 = p
            .subject_version("s", SchemaVersion::new(1))
            .unwrap()
            .unwrap();
        assert_eq!(v1.id, SchemaId::new(1));

        let latest = p
            .subject_version("s", SchemaVersion::latest())
            .unwrap()
            .unwrap();
        assert_eq!(latest.version, SchemaVersion::new(2));
        assert_eq!(latest.id, SchemaId::new(2));

        assert!(p
            .subject_version("s", SchemaVersion::new(3))
            .unwrap()
            .is_none());
        assert!(p
            .subject_version("missing", SchemaVersion::new(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_soft_delete_tombstones() {
        let p = projection();
        add_schema(&p, 1, "{}");
        append_version(&p, "s", 1, 1);
        append_version(&p, "s", 2, 1);

        p.apply(&MutationRecord::SubjectDeleted {
            subject: "s".to_string(),
            permanent: false,
        });

        assert!(p.list_subjects().unwrap().is_empty());
        assert!(p.list_versions("s").unwrap().is_none());
        assert!(p
            .subject_version("s", SchemaVersion::new(1))
            .unwrap()
            .is_none());
        // Version counter survives the tombstones
        assert_eq!(p.peek_next_version("s").unwrap(), 3);
    }

    #[test]
    fn test_permanent_delete_keeps_counter() {
        let p = projection();
        add_schema(&p, 1, "{}");
        append_version(&p, "s", 1, 1);
        append_version(&p, "s", 2, 1);

        p.apply(&MutationRecord::SubjectDeleted {
            subject: "s".to_string(),
            permanent: true,
        });

        assert!(p.list_versions("s").unwrap().is_none());
        // Retired numbers are never reassigned
        assert_eq!(p.peek_next_version("s").unwrap(), 3);
    }

    #[test]
    fn test_referencing_subjects() {
        let p = projection();
        add_schema(&p, 1, "{}");
        add_schema(&p, 2, "{}");
        append_version(&p, "a", 1, 1);
        append_version(&p, "b", 1, 2);
        append_version(&p, "c", 1, 1);

        assert_eq!(
            p.referencing_subjects(SchemaId::new(1)).unwrap(),
            vec!["a".to_string(), "c".to_string()]
        );

        // Tombstoned versions no longer count as references
        p.apply(&MutationRecord::SubjectDeleted {
            subject: "a".to_string(),
            permanent: false,
        });
        assert_eq!(
            p.referencing_subjects(SchemaId::new(1)).unwrap(),
            vec!["c".to_string()]
        );
    }

    #[test]
    fn test_compatibility_config() {
        let p = projection();
        assert_eq!(
            p.effective_compatibility("s").unwrap(),
            CompatibilityLevel::Backward
        );

        p.apply(&MutationRecord::CompatibilitySet {
            subject: None,
            level: CompatibilityLevel::Full,
        });
        assert_eq!(
            p.global_compatibility().unwrap(),
            CompatibilityLevel::Full
        );
        assert_eq!(
            p.effective_compatibility("s").unwrap(),
            CompatibilityLevel::Full
        );

        p.apply(&MutationRecord::CompatibilitySet {
            subject: Some("s".to_string()),
            level: CompatibilityLevel::None,
        });
        assert_eq!(
            p.effective_compatibility("s").unwrap(),
            CompatibilityLevel::None
        );
        assert_eq!(
            p.effective_compatibility("other").unwrap(),
            CompatibilityLevel::Full
        );
    }

    #[test]
    fn test_degraded_refuses_reads() {
        let p = projection();
        add_schema(&p, 1, "{}");
        append_version(&p, "s", 1, 1);

        p.mark_degraded();

        assert!(matches!(
            p.list_subjects(),
            Err(RegistryError::Degraded)
        ));
        assert!(matches!(
            p.schema_by_id(SchemaId::new(1)),
            Err(RegistryError::Degraded)
        ));
        assert!(matches!(
            p.subject_version("s", SchemaVersion::latest()),
            Err(RegistryError::Degraded)
        ));
    }
}
