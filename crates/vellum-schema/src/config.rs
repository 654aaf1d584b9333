//! Registry configuration

use crate::error::{RegistryError, RegistryResult};
use crate::replication::Role;
use crate::types::CompatibilityLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vellum_core::AuthDirectory;

/// Configuration for one registry node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Host to bind the HTTP listener to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind the HTTP listener to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Initial replication role of this node
    #[serde(default)]
    pub role: NodeRole,

    /// Base URL of the current primary (required on followers that should
    /// forward writes)
    #[serde(default)]
    pub primary_url: Option<String>,

    /// Default compatibility level for subjects without an override
    #[serde(default)]
    pub compatibility: CompatibilityLevel,

    /// Path to the auth file (users + ACLs). Absent means authentication
    /// is disabled and every request is anonymous.
    #[serde(default)]
    pub auth_file: Option<PathBuf>,

    /// Realm announced in Basic auth challenges
    #[serde(default = "default_realm")]
    pub realm: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_realm() -> String {
    "Vellum Schema Registry".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            role: NodeRole::default(),
            primary_url: None,
            compatibility: CompatibilityLevel::default(),
            auth_file: None,
            realm: default_realm(),
        }
    }
}

impl RegistryConfig {
    /// Config for a single standalone primary.
    pub fn standalone() -> Self {
        Self {
            role: NodeRole::Leading,
            ..Default::default()
        }
    }

    /// Config for a replica forwarding writes to the given primary.
    pub fn replica(primary_url: impl Into<String>) -> Self {
        Self {
            role: NodeRole::Following,
            primary_url: Some(primary_url.into()),
            ..Default::default()
        }
    }

    pub fn with_compatibility(mut self, level: CompatibilityLevel) -> Self {
        self.compatibility = level;
        self
    }

    pub fn with_auth_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.auth_file = Some(path.into());
        self
    }

    pub fn with_listen(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Load the auth directory named by `auth_file`, if any.
    pub fn load_auth_directory(&self) -> RegistryResult<Option<AuthDirectory>> {
        let Some(path) = &self.auth_file else {
            return Ok(None);
        };
        load_auth_directory(path).map(Some)
    }
}

/// Initial node role, as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    #[default]
    Leading,
    Following,
}

impl From<NodeRole> for Role {
    fn from(role: NodeRole) -> Role {
        match role {
            NodeRole::Leading => Role::Leading,
            NodeRole::Following => Role::Following,
        }
    }
}

impl std::str::FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "leading" | "leader" | "primary" => Ok(NodeRole::Leading),
            "following" | "follower" | "replica" => Ok(NodeRole::Following),
            _ => Err(format!("Unknown node role: {}", s)),
        }
    }
}

/// Read and parse an auth file.
pub fn load_auth_directory(path: &Path) -> RegistryResult<AuthDirectory> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        RegistryError::Config(format!("cannot read auth file {}: {e}", path.display()))
    })?;
    AuthDirectory::from_json(&contents)
        .map_err(|e| RegistryError::Config(format!("invalid auth file: {e}")))
}
