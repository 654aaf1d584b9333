//! Authentication and authorization for the Vellum schema registry
//!
//! This module provides the security primitives consumed by the registry:
//! - Principal management (users with assigned roles)
//! - Credential records with constant-time password verification
//! - Access Control Lists (ACLs) over subject and config resources
//! - A deterministic authorization engine with most-specific-match semantics
//!
//! ## Security Model
//!
//! Vellum uses a principal-based security model:
//! - **Principal**: an authenticated identity plus its set of roles
//! - **ACL entry**: an allow rule binding a principal matcher to a set of
//!   operations on a resource pattern
//! - **Default deny**: an operation is permitted only if a matching ACL
//!   entry grants it
//!
//! ## Match Resolution
//!
//! When several entries match a request, the entry with the most specific
//! resource pattern decides the outcome. Specificity is a total order:
//! exact name > longest literal prefix > bare wildcard. Entries tied on
//! specificity are unioned. This keeps authorization deterministic no
//! matter how the ACL table is ordered on disk.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Unknown principal: {0}")]
    UnknownPrincipal(String),

    #[error("Invalid principal matcher: {0}")]
    InvalidPrincipalMatcher(String),

    #[error("Invalid resource pattern: {0}")]
    InvalidResourcePattern(String),

    #[error("Invalid auth file: {0}")]
    InvalidAuthFile(String),
}

pub type AuthResult<T> = std::result::Result<T, AuthError>;

// ============================================================================
// Principals
// ============================================================================

/// An authenticated identity with its assigned roles.
///
/// Principals are resolved by the transport layer (HTTP Basic auth against
/// the credential table) before any registry operation runs. The engine
/// itself never sees passwords.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Identity string (username)
    pub identity: String,
    /// Roles assigned to this principal
    pub roles: HashSet<String>,
}

impl Principal {
    pub fn new(identity: impl Into<String>, roles: impl IntoIterator<Item = String>) -> Self {
        Self {
            identity: identity.into(),
            roles: roles.into_iter().collect(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// Stored credential for a user: salted SHA-256 digest.
///
/// Custom Debug redacts the digest and salt so credential material never
/// reaches logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Username (unique)
    pub username: String,
    /// Salt, hex encoded
    pub salt: String,
    /// SHA-256(salt || password), hex encoded
    pub digest: String,
    /// Roles granted to this user
    #[serde(default)]
    pub roles: Vec<String>,
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("username", &self.username)
            .field("salt", &"[REDACTED]")
            .field("digest", &"[REDACTED]")
            .field("roles", &self.roles)
            .finish()
    }
}

impl CredentialRecord {
    /// Create a record from a plaintext password and salt.
    pub fn new(
        username: impl Into<String>,
        salt: impl Into<String>,
        password: &str,
        roles: Vec<String>,
    ) -> Self {
        let salt = salt.into();
        let digest = Self::digest_for(&salt, password);
        Self {
            username: username.into(),
            salt,
            digest,
            roles,
        }
    }

    fn digest_for(salt: &str, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Verify a password against this record in constant time.
    ///
    /// The expected digest is recomputed and compared with
    /// `subtle::ConstantTimeEq` so that response timing does not reveal at
    /// which byte a candidate diverged.
    pub fn verify(&self, password: &str) -> bool {
        let candidate = Self::digest_for(&self.salt, password);
        let expected = self.digest.as_bytes();
        let got = candidate.as_bytes();
        expected.len() == got.len() && bool::from(expected.ct_eq(got))
    }
}

// ============================================================================
// Operations and Resources
// ============================================================================

/// Operations an ACL entry can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Operation {
    /// Fetch schemas, list subjects and versions, read config
    Read,
    /// Register schemas, delete subjects, change config
    Write,
}

/// A concrete resource an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource<'a> {
    /// A subject by name
    Subject(&'a str),
    /// The global compatibility configuration
    Config,
}

/// Pattern addressing resources in ACL entries.
///
/// Subject patterns support exact names, literal-prefix globs (`orders-*`),
/// and the bare wildcard `*`. The global config resource is addressed
/// distinctly and is never matched by a subject wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResourcePattern {
    /// Matches `Resource::Config` only
    Config,
    /// Matches a subject by exact name
    SubjectExact(String),
    /// Matches subjects starting with the literal prefix
    SubjectPrefix(String),
    /// Matches every subject
    SubjectAny,
}

/// Total order over pattern specificity: exact beats prefix, a longer
/// prefix beats a shorter one, and the bare wildcard loses to everything.
/// Derived `Ord` ranks later variants higher, and `Prefix(n)` by `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Specificity {
    Wildcard,
    Prefix(usize),
    Exact,
}

impl ResourcePattern {
    /// Parse from the authfile syntax: `config`, `subject:<name>`,
    /// `subject:<prefix>*`, or `subject:*`.
    pub fn parse(s: &str) -> AuthResult<Self> {
        if s.eq_ignore_ascii_case("config") {
            return Ok(ResourcePattern::Config);
        }
        let Some(rest) = s.strip_prefix("subject:") else {
            return Err(AuthError::InvalidResourcePattern(s.to_string()));
        };
        if rest.is_empty() {
            return Err(AuthError::InvalidResourcePattern(s.to_string()));
        }
        if rest == "*" {
            return Ok(ResourcePattern::SubjectAny);
        }
        if let Some(prefix) = rest.strip_suffix('*') {
            if prefix.contains('*') {
                return Err(AuthError::InvalidResourcePattern(s.to_string()));
            }
            return Ok(ResourcePattern::SubjectPrefix(prefix.to_string()));
        }
        if rest.contains('*') {
            return Err(AuthError::InvalidResourcePattern(s.to_string()));
        }
        Ok(ResourcePattern::SubjectExact(rest.to_string()))
    }

    /// If this pattern matches the resource, return its specificity.
    pub fn match_specificity(&self, resource: &Resource<'_>) -> Option<Specificity> {
        match (self, resource) {
            (ResourcePattern::Config, Resource::Config) => Some(Specificity::Exact),
            (ResourcePattern::SubjectExact(name), Resource::Subject(s)) if name == s => {
                Some(Specificity::Exact)
            }
            (ResourcePattern::SubjectPrefix(prefix), Resource::Subject(s))
                if s.starts_with(prefix.as_str()) =>
            {
                Some(Specificity::Prefix(prefix.len()))
            }
            (ResourcePattern::SubjectAny, Resource::Subject(_)) => Some(Specificity::Wildcard),
            _ => None,
        }
    }
}

impl TryFrom<String> for ResourcePattern {
    type Error = AuthError;

    fn try_from(s: String) -> AuthResult<Self> {
        ResourcePattern::parse(&s)
    }
}

impl From<ResourcePattern> for String {
    fn from(p: ResourcePattern) -> String {
        match p {
            ResourcePattern::Config => "config".to_string(),
            ResourcePattern::SubjectExact(name) => format!("subject:{name}"),
            ResourcePattern::SubjectPrefix(prefix) => format!("subject:{prefix}*"),
            ResourcePattern::SubjectAny => "subject:*".to_string(),
        }
    }
}

// ============================================================================
// ACL Entries
// ============================================================================

/// Matches ACL entries to principals by identity or role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PrincipalMatcher {
    /// Matches the principal whose identity equals the name
    User(String),
    /// Matches any principal holding the role
    Role(String),
}

impl PrincipalMatcher {
    pub fn parse(s: &str) -> AuthResult<Self> {
        if let Some(name) = s.strip_prefix("user:") {
            return Ok(PrincipalMatcher::User(name.to_string()));
        }
        if let Some(role) = s.strip_prefix("role:") {
            return Ok(PrincipalMatcher::Role(role.to_string()));
        }
        Err(AuthError::InvalidPrincipalMatcher(s.to_string()))
    }

    pub fn matches(&self, principal: &Principal) -> bool {
        match self {
            PrincipalMatcher::User(name) => principal.identity == *name,
            PrincipalMatcher::Role(role) => principal.has_role(role),
        }
    }
}

impl TryFrom<String> for PrincipalMatcher {
    type Error = AuthError;

    fn try_from(s: String) -> AuthResult<Self> {
        PrincipalMatcher::parse(&s)
    }
}

impl From<PrincipalMatcher> for String {
    fn from(m: PrincipalMatcher) -> String {
        match m {
            PrincipalMatcher::User(name) => format!("user:{name}"),
            PrincipalMatcher::Role(role) => format!("role:{role}"),
        }
    }
}

/// A single allow rule. There are no deny entries; anything not granted is
/// denied by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclEntry {
    pub principal: PrincipalMatcher,
    pub operations: Vec<Operation>,
    pub resource: ResourcePattern,
}

impl AclEntry {
    pub fn new(
        principal: PrincipalMatcher,
        operations: Vec<Operation>,
        resource: ResourcePattern,
    ) -> Self {
        Self {
            principal,
            operations,
            resource,
        }
    }

    fn grants(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }
}

/// Outcome of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow)
    }
}

// ============================================================================
// Authorization Engine
// ============================================================================

/// Evaluates `(principal, operation, resource)` against the ACL table.
///
/// The table is read-only at runtime; it is loaded from configuration at
/// startup and never mutated through the registry API.
#[derive(Debug, Clone, Default)]
pub struct AclEngine {
    entries: Vec<AclEntry>,
}

impl AclEngine {
    pub fn new(entries: Vec<AclEntry>) -> Self {
        Self { entries }
    }

    /// Authorize an operation. Among entries matching both the principal and
    /// the resource, the most specific resource pattern decides; entries
    /// tied on specificity are unioned. No match means deny.
    pub fn authorize(
        &self,
        principal: &Principal,
        operation: Operation,
        resource: &Resource<'_>,
    ) -> Decision {
        let mut best: Option<Specificity> = None;
        let mut granted = false;

        for entry in &self.entries {
            if !entry.principal.matches(principal) {
                continue;
            }
            let Some(specificity) = entry.resource.match_specificity(resource) else {
                continue;
            };
            match best {
                Some(current) if specificity < current => {}
                Some(current) if specificity == current => {
                    granted = granted || entry.grants(operation);
                }
                _ => {
                    best = Some(specificity);
                    granted = entry.grants(operation);
                }
            }
        }

        if granted {
            Decision::Allow
        } else {
            debug!(
                principal = %principal.identity,
                operation = ?operation,
                "authorization denied"
            );
            Decision::Deny
        }
    }

    /// Keep only the subjects the principal may perform `operation` on,
    /// preserving the input order.
    pub fn filter_subjects<'a, I>(
        &self,
        principal: &Principal,
        operation: Operation,
        subjects: I,
    ) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        subjects
            .into_iter()
            .filter(|s| {
                self.authorize(principal, operation, &Resource::Subject(s))
                    .is_allowed()
            })
            .map(|s| s.to_string())
            .collect()
    }
}

// ============================================================================
// Auth directory (credential table + engine)
// ============================================================================

/// On-disk auth material: users with salted digests plus the ACL table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthFile {
    pub users: Vec<CredentialRecord>,
    pub acls: Vec<AclEntry>,
}

/// Resolved authentication directory: verifies credentials and answers
/// authorization queries.
#[derive(Debug, Clone)]
pub struct AuthDirectory {
    users: Vec<CredentialRecord>,
    engine: AclEngine,
}

impl AuthDirectory {
    pub fn new(users: Vec<CredentialRecord>, acls: Vec<AclEntry>) -> Self {
        Self {
            users,
            engine: AclEngine::new(acls),
        }
    }

    pub fn from_json(json: &str) -> AuthResult<Self> {
        let file: AuthFile =
            serde_json::from_str(json).map_err(|e| AuthError::InvalidAuthFile(e.to_string()))?;
        Ok(Self::new(file.users, file.acls))
    }

    /// Verify credentials and resolve the principal.
    ///
    /// Every stored record is scanned even after a username match so that
    /// timing does not reveal which usernames exist.
    pub fn authenticate(&self, username: &str, password: &str) -> AuthResult<Principal> {
        let mut matched: Option<&CredentialRecord> = None;
        for record in &self.users {
            let name_eq = record.username.as_bytes().len() == username.as_bytes().len()
                && bool::from(record.username.as_bytes().ct_eq(username.as_bytes()));
            if name_eq && record.verify(password) {
                matched = Some(record);
            }
        }
        match matched {
            Some(record) => Ok(Principal::new(
                record.username.clone(),
                record.roles.iter().cloned(),
            )),
            None => Err(AuthError::AuthenticationFailed),
        }
    }

    pub fn engine(&self) -> &AclEngine {
        &self.engine
    }
}
