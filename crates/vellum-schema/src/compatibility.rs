//! Schema compatibility checking
//!
//! The store consults a [`CompatibilityCheck`] collaborator before
//! committing any new version. The contract is deliberately narrow: given
//! the effective level, the candidate, and the prior live versions
//! (oldest first), answer compatible-or-not with reasons. Implementations
//! must be deterministic and side-effect-free; the store never commits a
//! schema the checker rejected.

use crate::error::{RegistryError, RegistryResult};
use crate::types::{CompatibilityLevel, SchemaType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of a compatibility check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityResult {
    /// Whether the schemas are compatible
    pub is_compatible: bool,
    /// Reasons for rejection (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
}

impl CompatibilityResult {
    pub fn compatible() -> Self {
        Self {
            is_compatible: true,
            messages: Vec::new(),
        }
    }

    pub fn incompatible(messages: Vec<String>) -> Self {
        Self {
            is_compatible: false,
            messages,
        }
    }
}

/// Compatibility checker collaborator interface.
pub trait CompatibilityCheck: Send + Sync {
    /// Check a candidate against prior versions (oldest first) under the
    /// given level.
    fn check(
        &self,
        level: CompatibilityLevel,
        schema_type: SchemaType,
        candidate: &str,
        priors: &[String],
    ) -> RegistryResult<CompatibilityResult>;
}

/// Structural field-level checker.
///
/// Evolution rules applied to Avro record schemas (`fields` array, a field
/// without `default` is required) and JSON Schemas (`properties` +
/// `required`):
/// - BACKWARD: the new schema may not introduce a required field the old
///   schema lacks, and may not change the type of a shared field.
/// - FORWARD: the new schema may not drop a field the old schema requires,
///   and may not change the type of a shared field.
/// - Primitive-vs-primitive: the type strings must match.
///
/// Protobuf payloads are accepted as-is; field-number evolution rules need
/// a proto parser, which is outside this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralChecker;

impl StructuralChecker {
    pub fn new() -> Self {
        Self
    }

    fn check_pair(
        &self,
        level: CompatibilityLevel,
        candidate: &FieldShape,
        prior: &FieldShape,
        prior_label: &str,
    ) -> Vec<String> {
        let mut messages = Vec::new();

        match (candidate, prior) {
            (FieldShape::Primitive(new_ty), FieldShape::Primitive(old_ty)) => {
                if new_ty != old_ty {
                    messages.push(format!(
                        "{}: primitive type changed from '{}' to '{}'",
                        prior_label, old_ty, new_ty
                    ));
                }
            }
            (FieldShape::Record(new_fields), FieldShape::Record(old_fields)) => {
                if level.is_backward() {
                    for (name, field) in new_fields {
                        match old_fields.get(name) {
                            None if field.required => messages.push(format!(
                                "{}: new required field '{}' cannot be read from old data",
                                prior_label, name
                            )),
                            Some(old_field) if old_field.type_name != field.type_name => {
                                messages.push(format!(
                                    "{}: field '{}' changed type from '{}' to '{}'",
                                    prior_label, name, old_field.type_name, field.type_name
                                ))
                            }
                            _ => {}
                        }
                    }
                }
                if level.is_forward() {
                    for (name, old_field) in old_fields {
                        match new_fields.get(name) {
                            None if old_field.required => messages.push(format!(
                                "{}: required field '{}' was removed",
                                prior_label, name
                            )),
                            Some(field) if field.type_name != old_field.type_name => {
                                // Type changes are symmetric; avoid reporting
                                // them twice under FULL.
                                if !level.is_backward() {
                                    messages.push(format!(
                                        "{}: field '{}' changed type from '{}' to '{}'",
                                        prior_label, name, old_field.type_name, field.type_name
                                    ))
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
            (new, old) => {
                messages.push(format!(
                    "{}: schema shape changed from {} to {}",
                    prior_label,
                    old.kind(),
                    new.kind()
                ));
            }
        }

        messages
    }
}

impl CompatibilityCheck for StructuralChecker {
    fn check(
        &self,
        level: CompatibilityLevel,
        schema_type: SchemaType,
        candidate: &str,
        priors: &[String],
    ) -> RegistryResult<CompatibilityResult> {
        if level == CompatibilityLevel::None || priors.is_empty() {
            return Ok(CompatibilityResult::compatible());
        }

        if schema_type == SchemaType::Protobuf {
            return Ok(CompatibilityResult::compatible());
        }

        let new_shape = FieldShape::parse(candidate)
            .map_err(|e| RegistryError::InvalidSchema(format!("candidate schema: {}", e)))?;

        // Non-transitive levels check only the latest prior version.
        let start = if level.is_transitive() {
            0
        } else {
            priors.len() - 1
        };

        let mut messages = Vec::new();
        for (i, prior_str) in priors.iter().enumerate().skip(start) {
            let prior = FieldShape::parse(prior_str)
                .map_err(|e| RegistryError::InvalidSchema(format!("prior schema {}: {}", i, e)))?;
            let label = format!("version {}", i + 1);
            messages.extend(self.check_pair(level, &new_shape, &prior, &label));
        }

        if messages.is_empty() {
            Ok(CompatibilityResult::compatible())
        } else {
            Ok(CompatibilityResult::incompatible(messages))
        }
    }
}

/// A named field extracted from a record-like schema
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldInfo {
    type_name: String,
    required: bool,
}

/// Comparable structural view of a schema
#[derive(Debug, Clone)]
enum FieldShape {
    /// `{"type": "string"}` and friends
    Primitive(String),
    /// Avro record / JSON Schema object: field name -> info
    Record(BTreeMap<String, FieldInfo>),
}

impl FieldShape {
    fn kind(&self) -> &'static str {
        match self {
            FieldShape::Primitive(_) => "a primitive",
            FieldShape::Record(_) => "a record",
        }
    }

    fn parse(schema: &str) -> Result<Self, String> {
        let value: serde_json::Value =
            serde_json::from_str(schema).map_err(|e| e.to_string())?;

        // Avro record: {"type": "record", "fields": [...]}
        if let Some(fields) = value.get("fields").and_then(|f| f.as_array()) {
            let mut map = BTreeMap::new();
            for field in fields {
                let name = field
                    .get("name")
                    .and_then(|n| n.as_str())
                    .ok_or("record field without a name")?;
                let type_name = type_label(field.get("type"));
                let required = field.get("default").is_none();
                map.insert(name.to_string(), FieldInfo { type_name, required });
            }
            return Ok(FieldShape::Record(map));
        }

        // JSON Schema object: {"properties": {...}, "required": [...]}
        if let Some(props) = value.get("properties").and_then(|p| p.as_object()) {
            let required: Vec<&str> = value
                .get("required")
                .and_then(|r| r.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
                .unwrap_or_default();
            let mut map = BTreeMap::new();
            for (name, prop) in props {
                let type_name = type_label(prop.get("type"));
                map.insert(
                    name.clone(),
                    FieldInfo {
                        type_name,
                        required: required.contains(&name.as_str()),
                    },
                );
            }
            return Ok(FieldShape::Record(map));
        }

        match value.get("type").and_then(|t| t.as_str()) {
            Some(t) => Ok(FieldShape::Primitive(t.to_string())),
            None => Err("schema has neither fields, properties, nor a type".to_string()),
        }
    }
}

/// Flatten a field type to a comparable label. Union types (e.g. Avro
/// `["null", "string"]`) keep their full shape so widening is detected.
fn type_label(ty: Option<&serde_json::Value>) -> String {
    match ty {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "unknown".to_string(),
    }
}
