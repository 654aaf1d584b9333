//! Integration tests for vellum-schema
//!
//! Exercises a two-node cluster (one leading, one following) sharing an
//! in-memory mutation log, with the ACL setup used throughout: role
//! `aladdin` has read+write on `cave*`, role `admin` has read+write on
//! every subject and on the config resource, role `reader` has read on
//! `carpet*`.

use std::sync::Arc;
use std::time::Duration;
use vellum_core::{
    AclEntry, AuthDirectory, CredentialRecord, Operation, Principal, PrincipalMatcher,
    ResourcePattern,
};
use vellum_schema::auth::Gate;
use vellum_schema::compatibility::StructuralChecker;
use vellum_schema::forward::{LocalForwarder, RegistryNode};
use vellum_schema::registry::SchemaRegistry;
use vellum_schema::replication::{role_channel, MemoryLog, MutationLog, Role};
use vellum_schema::types::{CompatibilityLevel, SchemaId, SchemaType, SchemaVersion};
use vellum_schema::RegistryError;

const AVRO_SCHEMA: &str =
    r#"{"type": "record", "name": "Message", "fields": [{"name": "text", "type": "string"}]}"#;
const JSON_SCHEMA: &str =
    r#"{"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]}"#;

fn auth_directory() -> Arc<AuthDirectory> {
    let read_write = vec![Operation::Read, Operation::Write];
    Arc::new(AuthDirectory::new(
        vec![
            CredentialRecord::new("admin", "s1", "admin", vec!["admin".into()]),
            CredentialRecord::new("aladdin", "s2", "opensesame", vec!["aladdin".into()]),
            CredentialRecord::new("reader", "s3", "secret", vec!["reader".into()]),
        ],
        vec![
            AclEntry::new(
                PrincipalMatcher::Role("aladdin".into()),
                read_write.clone(),
                ResourcePattern::parse("subject:cave*").unwrap(),
            ),
            AclEntry::new(
                PrincipalMatcher::Role("admin".into()),
                read_write.clone(),
                ResourcePattern::parse("subject:*").unwrap(),
            ),
            AclEntry::new(
                PrincipalMatcher::Role("admin".into()),
                read_write,
                ResourcePattern::parse("config").unwrap(),
            ),
            AclEntry::new(
                PrincipalMatcher::Role("reader".into()),
                vec![Operation::Read],
                ResourcePattern::parse("subject:carpet*").unwrap(),
            ),
        ],
    ))
}

fn principal(name: &str) -> Principal {
    Principal::new(name, [name.to_string()])
}

struct Cluster {
    primary: Arc<RegistryNode>,
    replica: Arc<RegistryNode>,
    _roles: Vec<tokio::sync::watch::Sender<Role>>,
}

impl Cluster {
    fn new(directory: Option<Arc<AuthDirectory>>) -> Self {
        let log: Arc<dyn MutationLog> = Arc::new(MemoryLog::new());
        let gate = match directory {
            Some(directory) => Gate::with_directory(directory),
            None => Gate::open(),
        };

        let (primary_tx, primary_rx) = role_channel(Role::Leading);
        let primary = Arc::new(RegistryNode::new(
            SchemaRegistry::new(
                log.clone(),
                Arc::new(StructuralChecker::new()),
                CompatibilityLevel::Backward,
            ),
            gate.clone(),
            primary_rx,
            None,
        ));

        let (replica_tx, replica_rx) = role_channel(Role::Following);
        let replica = Arc::new(RegistryNode::new(
            SchemaRegistry::new(
                log,
                Arc::new(StructuralChecker::new()),
                CompatibilityLevel::Backward,
            ),
            gate,
            replica_rx,
            Some(Arc::new(LocalForwarder::new(primary.clone()))),
        ));

        Self {
            primary,
            replica,
            _roles: vec![primary_tx, replica_tx],
        }
    }

    /// Wait until the replica has replayed everything the primary applied.
    async fn converge(&self) {
        let target = self.primary.registry().projection().last_applied();
        for _ in 0..500 {
            if self.replica.registry().projection().last_applied() >= target {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("replica did not converge to sequence {target}");
    }
}

// ============================================================================
// Authentication and authorization
// ============================================================================

#[tokio::test]
async fn test_unauthenticated_is_never_disguised() {
    let cluster = Cluster::new(Some(auth_directory()));
    let node = &cluster.primary;

    let err = node
        .register(None, "cave-1", SchemaType::Avro, AVRO_SCHEMA)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Unauthenticated));

    let err = node
        .get_version(None, "cave-1", SchemaVersion::latest())
        .unwrap_err();
    assert!(matches!(err, RegistryError::Unauthenticated));

    let err = node.list_subjects(None).unwrap_err();
    assert!(matches!(err, RegistryError::Unauthenticated));

    let err = node
        .get_schema_by_id(None, SchemaId::new(1))
        .unwrap_err();
    assert!(matches!(err, RegistryError::Unauthenticated));

    let err = node.get_config(None, None).unwrap_err();
    assert!(matches!(err, RegistryError::Unauthenticated));
}

#[tokio::test]
async fn test_register_and_fetch_with_auth() {
    let cluster = Cluster::new(Some(auth_directory()));
    let node = &cluster.primary;
    let aladdin = principal("aladdin");

    let registered = node
        .register(Some(&aladdin), "cave-1", SchemaType::Avro, AVRO_SCHEMA)
        .await
        .unwrap();

    let fetched = node
        .get_version(Some(&aladdin), "cave-1", SchemaVersion::latest())
        .unwrap();
    assert_eq!(fetched.id, registered.id);
    assert_eq!(fetched.version, SchemaVersion::new(1));

    // A write outside the granted prefix reads as a missing subject
    let err = node
        .register(Some(&aladdin), "carpet-1", SchemaType::Avro, AVRO_SCHEMA)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), 40401);
}

#[tokio::test]
async fn test_list_subjects_is_filtered_in_order() {
    let cluster = Cluster::new(Some(auth_directory()));
    let node = &cluster.primary;
    let admin = principal("admin");
    let aladdin = principal("aladdin");
    let reader = principal("reader");

    node.register(Some(&aladdin), "cave-1", SchemaType::Avro, AVRO_SCHEMA)
        .await
        .unwrap();
    node.register(Some(&admin), "carpet-1", SchemaType::Avro, AVRO_SCHEMA)
        .await
        .unwrap();

    assert_eq!(
        node.list_subjects(Some(&admin)).unwrap(),
        vec!["cave-1".to_string(), "carpet-1".to_string()]
    );
    assert_eq!(
        node.list_subjects(Some(&aladdin)).unwrap(),
        vec!["cave-1".to_string()]
    );
    assert_eq!(
        node.list_subjects(Some(&reader)).unwrap(),
        vec!["carpet-1".to_string()]
    );
}

#[tokio::test]
async fn test_schema_by_id_authorizes_via_referencing_subjects() {
    let cluster = Cluster::new(Some(auth_directory()));
    let node = &cluster.primary;
    let admin = principal("admin");
    let aladdin = principal("aladdin");
    let reader = principal("reader");

    let cave_id = node
        .register(Some(&aladdin), "cave-1", SchemaType::Avro, AVRO_SCHEMA)
        .await
        .unwrap()
        .id;
    let carpet_id = node
        .register(Some(&admin), "carpet-1", SchemaType::Json, JSON_SCHEMA)
        .await
        .unwrap()
        .id;
    assert_ne!(cave_id, carpet_id);

    // Each principal can resolve ids referenced by subjects they may read
    assert!(node.get_schema_by_id(Some(&aladdin), cave_id).is_ok());
    assert!(node.get_schema_by_id(Some(&reader), carpet_id).is_ok());
    assert!(node.get_schema_by_id(Some(&admin), cave_id).is_ok());

    // Denied ids read exactly like absent ids
    let denied = node
        .get_schema_by_id(Some(&aladdin), carpet_id)
        .unwrap_err();
    let denied_too = node.get_schema_by_id(Some(&reader), cave_id).unwrap_err();
    let absent = node
        .get_schema_by_id(Some(&admin), SchemaId::new(9999))
        .unwrap_err();

    for err in [&denied, &denied_too, &absent] {
        assert_eq!(err.error_code(), 40403);
        assert_eq!(err.http_status(), 404);
        assert_eq!(err.to_string(), absent.to_string());
    }
}

#[tokio::test]
async fn test_get_version_denial_matches_absence() {
    let cluster = Cluster::new(Some(auth_directory()));
    let node = &cluster.primary;
    let admin = principal("admin");
    let reader = principal("reader");

    node.register(Some(&admin), "cave-1", SchemaType::Avro, AVRO_SCHEMA)
        .await
        .unwrap();

    let denied = node
        .get_version(Some(&reader), "cave-1", SchemaVersion::new(1))
        .unwrap_err();
    let absent = node
        .get_version(Some(&reader), "carpet-missing", SchemaVersion::new(1))
        .unwrap_err();

    assert_eq!(denied.error_code(), absent.error_code());
    assert_eq!(denied.http_status(), absent.http_status());
    assert_eq!(
        denied.to_string().replace("cave-1", "S"),
        absent.to_string().replace("carpet-missing", "S")
    );
}

#[tokio::test]
async fn test_config_resource_is_gated() {
    let cluster = Cluster::new(Some(auth_directory()));
    let node = &cluster.primary;
    let admin = principal("admin");
    let aladdin = principal("aladdin");

    // Only admin holds a config grant
    let err = node.get_config(Some(&aladdin), None).unwrap_err();
    assert_eq!(err.http_status(), 404);
    let err = node
        .set_config(Some(&aladdin), None, CompatibilityLevel::None)
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 404);

    let level = node
        .set_config(Some(&admin), None, CompatibilityLevel::Full)
        .await
        .unwrap();
    assert_eq!(level, CompatibilityLevel::Full);
    assert_eq!(
        node.get_config(Some(&admin), None).unwrap(),
        CompatibilityLevel::Full
    );

    // Subject-level config rides on the subject grant
    node.register(Some(&aladdin), "cave-1", SchemaType::Avro, AVRO_SCHEMA)
        .await
        .unwrap();
    node.set_config(Some(&aladdin), Some("cave-1"), CompatibilityLevel::None)
        .await
        .unwrap();
    assert_eq!(
        node.get_config(Some(&aladdin), Some("cave-1")).unwrap(),
        CompatibilityLevel::None
    );
}

// ============================================================================
// Identity, versions, compatibility
// ============================================================================

#[tokio::test]
async fn test_content_dedup_across_subjects() {
    let cluster = Cluster::new(None);
    let node = &cluster.primary;

    let a = node
        .register(None, "events-value", SchemaType::Avro, AVRO_SCHEMA)
        .await
        .unwrap();
    let b = node
        .register(
            None,
            "notifications-value",
            SchemaType::Avro,
            // Same content, different formatting
            &AVRO_SCHEMA.replace(": ", ":"),
        )
        .await
        .unwrap();

    assert_eq!(a.id, b.id);
    assert_eq!(node.list_subjects(None).unwrap().len(), 2);
}

#[tokio::test]
async fn test_version_numbers_survive_deletion() {
    let cluster = Cluster::new(None);
    let node = &cluster.primary;

    node.register(None, "s", SchemaType::Avro, AVRO_SCHEMA)
        .await
        .unwrap();
    node.set_config(None, Some("s"), CompatibilityLevel::None)
        .await
        .unwrap();
    node.register(None, "s", SchemaType::Avro, r#"{"type": "int"}"#)
        .await
        .unwrap();

    let deleted = node.delete_subject(None, "s", false).await.unwrap();
    assert_eq!(deleted, vec![1, 2]);

    // Tombstoned subjects vanish from every read surface
    assert!(node.list_subjects(None).unwrap().is_empty());
    let err = node.list_versions(None, "s").unwrap_err();
    assert_eq!(err.error_code(), 40401);

    // Re-registration continues the per-subject counter
    let revived = node
        .register(None, "s", SchemaType::Avro, AVRO_SCHEMA)
        .await
        .unwrap();
    assert_eq!(revived.version, SchemaVersion::new(3));
}

#[tokio::test]
async fn test_incompatible_schema_is_rejected_atomically() {
    let cluster = Cluster::new(None);
    let node = &cluster.primary;

    node.register(None, "s", SchemaType::Avro, AVRO_SCHEMA)
        .await
        .unwrap();
    let next_id = node.registry().projection().peek_next_schema_id().unwrap();

    // Adding a required field violates the BACKWARD default
    let widened = r#"{"type": "record", "name": "Message", "fields": [{"name": "text", "type": "string"}, {"name": "priority", "type": "int"}]}"#;
    let err = node
        .register(None, "s", SchemaType::Avro, widened)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::IncompatibleSchema(_)));
    assert_eq!(err.http_status(), 409);

    // Nothing was minted or appended
    assert_eq!(node.list_versions(None, "s").unwrap(), vec![1]);
    assert_eq!(
        node.registry().projection().peek_next_schema_id().unwrap(),
        next_id
    );
}

// ============================================================================
// Replication and forwarding
// ============================================================================

#[tokio::test]
async fn test_replica_converges_to_primary() {
    let cluster = Cluster::new(None);

    let registered = cluster
        .primary
        .register(None, "users-value", SchemaType::Avro, AVRO_SCHEMA)
        .await
        .unwrap();
    cluster
        .primary
        .set_config(None, Some("users-value"), CompatibilityLevel::Full)
        .await
        .unwrap();

    cluster.converge().await;

    // Identical answers from both nodes
    assert_eq!(
        cluster.replica.list_subjects(None).unwrap(),
        cluster.primary.list_subjects(None).unwrap()
    );
    let from_replica = cluster
        .replica
        .get_version(None, "users-value", SchemaVersion::latest())
        .unwrap();
    let from_primary = cluster
        .primary
        .get_version(None, "users-value", SchemaVersion::latest())
        .unwrap();
    assert_eq!(from_replica.id, from_primary.id);
    assert_eq!(from_replica.version, from_primary.version);
    assert_eq!(from_replica.schema, from_primary.schema);

    let schema = cluster
        .replica
        .get_schema_by_id(None, registered.id)
        .unwrap();
    assert_eq!(schema.schema, from_primary.schema);
    assert_eq!(
        cluster
            .replica
            .get_config(None, Some("users-value"))
            .unwrap(),
        CompatibilityLevel::Full
    );
}

#[tokio::test]
async fn test_forwarding_transparency() {
    let cluster = Cluster::new(Some(auth_directory()));
    let aladdin = principal("aladdin");

    // Mutation via the replica relays to the primary
    let via_replica = cluster
        .replica
        .register(Some(&aladdin), "cave-1", SchemaType::Avro, AVRO_SCHEMA)
        .await
        .unwrap();

    // The same operation against the primary yields the identical result
    // (idempotent re-registration returns the assigned pair)
    let direct = cluster
        .primary
        .register(Some(&aladdin), "cave-1", SchemaType::Avro, AVRO_SCHEMA)
        .await
        .unwrap();
    assert_eq!(via_replica, direct);

    // The write is immediately visible on the primary
    let fetched = cluster
        .primary
        .get_version(Some(&aladdin), "cave-1", SchemaVersion::latest())
        .unwrap();
    assert_eq!(fetched.id, via_replica.id);
}

#[tokio::test]
async fn test_forwarded_authorization_still_applies() {
    let cluster = Cluster::new(Some(auth_directory()));
    let reader = principal("reader");

    // reader has no write grant anywhere; the replica rejects before
    // relaying, disguised as absence
    let err = cluster
        .replica
        .register(Some(&reader), "carpet-1", SchemaType::Avro, AVRO_SCHEMA)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), 40401);
}

#[tokio::test]
async fn test_config_propagates_through_forwarding() {
    let cluster = Cluster::new(Some(auth_directory()));
    let admin = principal("admin");

    for level in [
        CompatibilityLevel::Full,
        CompatibilityLevel::Backward,
        CompatibilityLevel::Forward,
        CompatibilityLevel::None,
    ] {
        // Write via the replica; the primary reflects it synchronously
        cluster
            .replica
            .set_config(Some(&admin), None, level)
            .await
            .unwrap();
        assert_eq!(cluster.primary.get_config(Some(&admin), None).unwrap(), level);

        // And the replica itself converges after replay
        cluster.converge().await;
        assert_eq!(cluster.replica.get_config(Some(&admin), None).unwrap(), level);
    }
}

#[tokio::test]
async fn test_no_primary_available() {
    // A follower with no forwarder configured
    let log: Arc<dyn MutationLog> = Arc::new(MemoryLog::new());
    let (_tx, role_rx) = role_channel(Role::Following);
    let node = RegistryNode::new(
        SchemaRegistry::new(
            log,
            Arc::new(StructuralChecker::new()),
            CompatibilityLevel::Backward,
        ),
        Gate::open(),
        role_rx,
        None,
    );

    let err = node
        .register(None, "s", SchemaType::Avro, AVRO_SCHEMA)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::NoPrimaryAvailable));
    assert_eq!(err.http_status(), 503);
}

#[tokio::test]
async fn test_role_change_promotes_follower() {
    let log: Arc<dyn MutationLog> = Arc::new(MemoryLog::new());
    let (role_tx, role_rx) = role_channel(Role::Following);
    let node = RegistryNode::new(
        SchemaRegistry::new(
            log,
            Arc::new(StructuralChecker::new()),
            CompatibilityLevel::None,
        ),
        Gate::open(),
        role_rx,
        None,
    );

    assert!(matches!(
        node.register(None, "s", SchemaType::Avro, AVRO_SCHEMA)
            .await
            .unwrap_err(),
        RegistryError::NoPrimaryAvailable
    ));

    // Leadership notification arrives; the node now accepts writes
    role_tx.send(Role::Leading).unwrap();
    let registered = node
        .register(None, "s", SchemaType::Avro, AVRO_SCHEMA)
        .await
        .unwrap();
    assert_eq!(registered.version, SchemaVersion::new(1));
}

#[tokio::test]
async fn test_delete_via_replica_returns_versions() {
    let cluster = Cluster::new(Some(auth_directory()));
    let admin = principal("admin");

    cluster
        .primary
        .register(Some(&admin), "carpet-1", SchemaType::Avro, AVRO_SCHEMA)
        .await
        .unwrap();

    let deleted = cluster
        .replica
        .delete_subject(Some(&admin), "carpet-1", false)
        .await
        .unwrap();
    assert_eq!(deleted, vec![1]);

    cluster.converge().await;
    assert!(cluster
        .replica
        .list_subjects(Some(&admin))
        .unwrap()
        .is_empty());
}
