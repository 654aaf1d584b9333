//! Replication: mutation records, the ordered log abstraction, and the
//! state machine that folds records into the projection
//!
//! Every state mutation (schema minting, version appends, deletes, config
//! changes) is expressed as a [`MutationRecord`], appended to an ordered
//! replayable log, and applied through [`StateMachine::apply`]. The apply
//! path is identical on the primary and on replicas: the primary's writer
//! appends and then waits for its own records to come back through the
//! replay driver, so there is exactly one code path that ever touches the
//! projection.
//!
//! Sequencing is strict. The log assigns contiguous sequence numbers
//! starting at 1; the state machine requires exactly `last_applied + 1`.
//! A gap or duplicate means the node's view of the log is broken: the
//! projection is marked degraded and the node refuses further reads
//! instead of serving a divergent history.

use crate::error::{RegistryError, RegistryResult};
use crate::store::Projection;
use crate::types::{CompatibilityLevel, SchemaType};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info};

// ============================================================================
// Roles
// ============================================================================

/// Replication role of a node.
///
/// `Leading` nodes are the sole producers of new mutation records;
/// `Following` nodes replay and forward writes. Transitions arrive on an
/// injected watch channel so concurrent in-flight operations each see a
/// consistent snapshot of the role for their own duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leading,
    Following,
}

impl Role {
    pub fn is_leading(&self) -> bool {
        matches!(self, Role::Leading)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Leading => write!(f, "leading"),
            Role::Following => write!(f, "following"),
        }
    }
}

/// Create the role notification channel with an initial role.
pub fn role_channel(initial: Role) -> (watch::Sender<Role>, watch::Receiver<Role>) {
    watch::channel(initial)
}

// ============================================================================
// Mutation records
// ============================================================================

/// One replicated mutation. The projection is a fold over these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationRecord {
    /// A new schema id was minted. Emitted only when the content was not
    /// seen before; re-registration of known content produces no record.
    SchemaAdded {
        id: u32,
        schema_type: SchemaType,
        schema: String,
        identity_key: String,
    },
    /// A subject gained a version referencing an existing schema id.
    VersionAppended {
        subject: String,
        version: u32,
        schema_id: u32,
    },
    /// A subject was deleted (tombstoned, or emptied permanently).
    SubjectDeleted { subject: String, permanent: bool },
    /// Compatibility level changed; `subject: None` targets the global
    /// default.
    CompatibilitySet {
        subject: Option<String>,
        level: CompatibilityLevel,
    },
}

impl MutationRecord {
    pub fn encode(&self) -> RegistryResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(payload: &Bytes) -> RegistryResult<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

// ============================================================================
// Log abstraction
// ============================================================================

/// Ordered, appended, replayable byte log.
///
/// Sequence numbers are contiguous and start at 1. The log is the durable
/// replication substrate (a single-partition topic in production); this
/// crate only consumes the ordering contract.
#[async_trait]
pub trait MutationLog: Send + Sync {
    /// Append a payload, returning its assigned sequence number.
    async fn append(&self, payload: Bytes) -> RegistryResult<u64>;

    /// Read up to `max` entries starting at `from_seq` (inclusive).
    async fn read_from(&self, from_seq: u64, max: usize) -> RegistryResult<Vec<(u64, Bytes)>>;

    /// Highest sequence number appended so far (0 when empty).
    async fn latest_seq(&self) -> RegistryResult<u64>;

    /// Resolve once the log contains `seq`.
    async fn wait_for(&self, seq: u64);
}

/// In-memory log for tests and single-process deployments. Nodes sharing
/// one `MemoryLog` form a cluster.
#[derive(Default)]
pub struct MemoryLog {
    entries: RwLock<Vec<Bytes>>,
    appended: Notify,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MutationLog for MemoryLog {
    async fn append(&self, payload: Bytes) -> RegistryResult<u64> {
        let seq = {
            let mut entries = self.entries.write();
            entries.push(payload);
            entries.len() as u64
        };
        self.appended.notify_waiters();
        Ok(seq)
    }

    async fn read_from(&self, from_seq: u64, max: usize) -> RegistryResult<Vec<(u64, Bytes)>> {
        if from_seq == 0 {
            return Err(RegistryError::Storage(
                "log sequence numbers start at 1".to_string(),
            ));
        }
        let entries = self.entries.read();
        let start = (from_seq - 1) as usize;
        Ok(entries
            .iter()
            .enumerate()
            .skip(start)
            .take(max)
            .map(|(i, payload)| (i as u64 + 1, payload.clone()))
            .collect())
    }

    async fn latest_seq(&self) -> RegistryResult<u64> {
        Ok(self.entries.read().len() as u64)
    }

    async fn wait_for(&self, seq: u64) {
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            // Register interest before the check so an append landing in
            // between cannot be missed.
            notified.as_mut().enable();
            if self.entries.read().len() as u64 >= seq {
                return;
            }
            notified.await;
        }
    }
}

// ============================================================================
// State machine
// ============================================================================

/// Applies sequenced records to the projection, enforcing strict ordering.
pub struct StateMachine {
    projection: Arc<Projection>,
    applied: Notify,
}

impl StateMachine {
    pub fn new(projection: Arc<Projection>) -> Self {
        Self {
            projection,
            applied: Notify::new(),
        }
    }

    pub fn projection(&self) -> &Arc<Projection> {
        &self.projection
    }

    /// Apply one record. The sequence must be exactly `last_applied + 1`;
    /// anything else is fatal for this node's projection.
    pub fn apply(&self, seq: u64, record: &MutationRecord) -> RegistryResult<()> {
        let expected = self.projection.last_applied() + 1;
        if seq != expected {
            self.projection.mark_degraded();
            // Wake any writer blocked on wait_for_applied
            self.applied.notify_waiters();
            return Err(RegistryError::OutOfOrderReplication {
                expected,
                got: seq,
            });
        }
        self.projection.apply(record);
        self.projection.set_last_applied(seq);
        self.applied.notify_waiters();
        debug!(seq = seq, "applied replication record");
        Ok(())
    }

    /// Mark the node broken for reasons outside sequencing (e.g. a record
    /// that fails to decode).
    pub fn poison(&self, reason: &str) {
        error!(reason = reason, "replication fault");
        self.projection.mark_degraded();
        self.applied.notify_waiters();
    }

    /// Wait until `last_applied >= seq` (or the projection degrades).
    pub async fn wait_for_applied(&self, seq: u64) -> RegistryResult<()> {
        loop {
            let notified = self.applied.notified();
            tokio::pin!(notified);
            // Register interest before the checks so an apply landing in
            // between cannot be missed.
            notified.as_mut().enable();
            if self.projection.is_degraded() {
                return Err(RegistryError::Degraded);
            }
            if self.projection.last_applied() >= seq {
                return Ok(());
            }
            notified.await;
        }
    }
}

/// Replay batch size per log read.
const REPLAY_BATCH: usize = 64;

/// Drive the replay loop: follow the log tail and apply every record in
/// order. Runs on every node; the primary's own writes come back through
/// here too. Returns only when the node degrades.
pub async fn run_replay(log: Arc<dyn MutationLog>, machine: Arc<StateMachine>) {
    info!("replay driver started");
    loop {
        let next = machine.projection().last_applied() + 1;
        let batch = match log.read_from(next, REPLAY_BATCH).await {
            Ok(batch) => batch,
            Err(e) => {
                machine.poison(&format!("log read failed: {e}"));
                return;
            }
        };
        if batch.is_empty() {
            log.wait_for(next).await;
            continue;
        }
        for (seq, payload) in batch {
            let record = match MutationRecord::decode(&payload) {
                Ok(record) => record,
                Err(e) => {
                    machine.poison(&format!("undecodable record at sequence {seq}: {e}"));
                    return;
                }
            };
            if let Err(e) = machine.apply(seq, &record) {
                error!(error = %e, "stopping replay");
                return;
            }
        }
    }
}

/// Spawn the replay driver as a background task.
pub fn spawn_replay(
    log: Arc<dyn MutationLog>,
    machine: Arc<StateMachine>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_replay(log, machine))
}
