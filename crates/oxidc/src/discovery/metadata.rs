//! Immutable provider metadata snapshot

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// One fetched discovery document
///
/// Replaced wholesale when the cache refetches; never mutated in place.
#[derive(Debug, Clone)]
pub struct ProviderMetadata {
    document: Map<String, Value>,
}

impl ProviderMetadata {
    /// Parse a discovery response body
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when the body is not a JSON object.
    pub fn from_json(body: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(body).map_err(|e| {
            Error::protocol(
                "invalid_discovery_document",
                Some(format!("not valid JSON: {e}")),
            )
        })?;
        match value {
            Value::Object(document) => Ok(Self { document }),
            _ => Err(Error::protocol(
                "invalid_discovery_document",
                Some("discovery document is not a JSON object".to_string()),
            )),
        }
    }

    /// Build a snapshot from an already-parsed object (tests, overrides)
    pub fn from_map(document: Map<String, Value>) -> Self {
        Self { document }
    }

    /// Look up a raw metadata field
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.document.get(name)
    }

    /// The `issuer` value, when the document carries one
    pub fn issuer(&self) -> Option<&str> {
        self.document.get("issuer").and_then(Value::as_str)
    }

    /// Number of fields in the document
    pub fn len(&self) -> usize {
        self.document.len()
    }

    /// True when the document has no fields
    pub fn is_empty(&self) -> bool {
        self.document.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_document() {
        let metadata = ProviderMetadata::from_json(
            r#"{"issuer":"https://op.example.org","token_endpoint":"https://op.example.org/token"}"#,
        )
        .unwrap();
        assert_eq!(metadata.issuer(), Some("https://op.example.org"));
        assert_eq!(
            metadata.get("token_endpoint").unwrap(),
            "https://op.example.org/token"
        );
        assert_eq!(metadata.get("missing"), None);
    }

    #[test]
    fn non_object_document_is_a_protocol_error() {
        assert!(matches!(
            ProviderMetadata::from_json("[1,2,3]"),
            Err(Error::Protocol { .. })
        ));
        assert!(matches!(
            ProviderMetadata::from_json("not json"),
            Err(Error::Protocol { .. })
        ));
    }
}
