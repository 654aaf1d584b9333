//! Schema fingerprinting for content-addressed deduplication
//!
//! Two registrations with byte-equivalent canonical content and the same
//! schema type must resolve to the same global id. The identity key is the
//! fingerprint of the JSON-normalized content, qualified by the type.

use crate::types::SchemaType;
use sha2::{Digest, Sha256};

/// Schema fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaFingerprint {
    /// MD5 hash (16 bytes) - Confluent compatible
    pub md5: [u8; 16],
    /// SHA-256 hash (32 bytes)
    pub sha256: [u8; 32],
}

impl SchemaFingerprint {
    /// Compute the fingerprint of a schema string.
    ///
    /// Content is normalized (parsed and re-serialized as JSON) first so
    /// whitespace and key-order differences do not defeat deduplication.
    /// Protobuf content is hashed as-is.
    pub fn compute(schema_type: SchemaType, schema: &str) -> Self {
        let normalized = match schema_type {
            SchemaType::Avro | SchemaType::Json => normalize_json(schema),
            SchemaType::Protobuf => schema.to_string(),
        };

        let md5_hash = md5::compute(normalized.as_bytes());
        let mut md5 = [0u8; 16];
        md5.copy_from_slice(&md5_hash.0);

        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        let sha256_result = hasher.finalize();
        let mut sha256 = [0u8; 32];
        sha256.copy_from_slice(&sha256_result);

        Self { md5, sha256 }
    }

    /// MD5 fingerprint as hex string
    pub fn md5_hex(&self) -> String {
        hex::encode(self.md5)
    }

    /// SHA-256 fingerprint as hex string
    pub fn sha256_hex(&self) -> String {
        hex::encode(self.sha256)
    }

    /// The deduplication key: schema type qualifier + MD5 hex.
    ///
    /// Identical content under different schema types must not collide.
    pub fn identity_key(&self, schema_type: SchemaType) -> String {
        format!("{}:{}", schema_type.as_str(), self.md5_hex())
    }
}

/// Normalize JSON by parsing and re-serializing (serde_json maps preserve
/// a deterministic key order on output).
fn normalize_json(json: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(json) {
        Ok(value) => serde_json::to_string(&value).unwrap_or_else(|_| json.to_string()),
        Err(_) => json.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        let schema = r#"{"type": "string"}"#;
        let fp1 = SchemaFingerprint::compute(SchemaType::Avro, schema);
        let fp2 = SchemaFingerprint::compute(SchemaType::Avro, schema);
        assert_eq!(fp1.md5, fp2.md5);
        assert_eq!(fp1.sha256, fp2.sha256);
    }

    #[test]
    fn test_fingerprint_normalization() {
        let schema1 = r#"{"type":"string"}"#;
        let schema2 = r#"{ "type" : "string" }"#;
        let fp1 = SchemaFingerprint::compute(SchemaType::Avro, schema1);
        let fp2 = SchemaFingerprint::compute(SchemaType::Avro, schema2);
        assert_eq!(fp1.md5, fp2.md5);
    }

    #[test]
    fn test_fingerprint_hex_lengths() {
        let fp = SchemaFingerprint::compute(SchemaType::Json, r#"{"type": "object"}"#);
        assert_eq!(fp.md5_hex().len(), 32);
        assert_eq!(fp.sha256_hex().len(), 64);
    }

    #[test]
    fn test_identity_key_qualified_by_type() {
        let content = r#"{"type": "string"}"#;
        let avro = SchemaFingerprint::compute(SchemaType::Avro, content);
        let json = SchemaFingerprint::compute(SchemaType::Json, content);
        assert_ne!(
            avro.identity_key(SchemaType::Avro),
            json.identity_key(SchemaType::Json)
        );
    }

    #[test]
    fn test_protobuf_not_json_normalized() {
        let proto = "syntax = \"proto3\";\nmessage M { int64 id = 1; }";
        let fp1 = SchemaFingerprint::compute(SchemaType::Protobuf, proto);
        let fp2 = SchemaFingerprint::compute(SchemaType::Protobuf, proto);
        assert_eq!(fp1, fp2);
    }
}
