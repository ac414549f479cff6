//! Compact-token (JWS) parsing
//!
//! A compact token is three base64url segments over a dot-delimited string:
//! `base64url(header).base64url(payload).base64url(signature)`. The codec
//! splits the string once at parse time and decodes each segment lazily;
//! decoding is repeatable and never mutates the token.
//!
//! The undecoded `header.payload` prefix is the exact signing input for
//! signature verification - it is never re-encoded.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Base64url-encode without padding
pub fn base64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Base64url-decode, tolerating both padded and unpadded input
///
/// # Errors
///
/// Returns [`Error::MalformedToken`] when the input is not valid base64url.
pub fn base64url_decode(input: &str) -> Result<Vec<u8>> {
    let trimmed = input.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|e| Error::MalformedToken(format!("invalid base64url segment: {e}")))
}

/// Typed view of the JOSE header fields the verification path needs
#[derive(Debug, Clone, Deserialize)]
pub struct JoseHeader {
    /// Signing algorithm declared by the token
    pub alg: String,
    /// Key id hint, when the provider set one
    #[serde(default)]
    pub kid: Option<String>,
}

/// A parsed compact token
///
/// Immutable once constructed. Segment accessors decode on every call;
/// callers that need a decoded value more than once hold on to it.
#[derive(Debug, Clone)]
pub struct CompactToken {
    raw: String,
    header_b64: String,
    payload_b64: String,
    signature_b64: String,
}

impl CompactToken {
    /// Parse a compact token into its three segments
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedToken`] unless the input has exactly three
    /// dot-separated segments.
    pub fn parse(token: &str) -> Result<Self> {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(Error::MalformedToken(format!(
                "expected 3 dot-separated segments, found {}",
                segments.len()
            )));
        }
        Ok(Self {
            raw: token.to_string(),
            header_b64: segments[0].to_string(),
            payload_b64: segments[1].to_string(),
            signature_b64: segments[2].to_string(),
        })
    }

    /// The original encoded token
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The exact signing input: encoded header, dot, encoded payload
    pub fn signing_input(&self) -> String {
        format!("{}.{}", self.header_b64, self.payload_b64)
    }

    /// Decode the header segment as a JSON object
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedToken`] when the segment is not base64url
    /// or does not decode to a JSON object.
    pub fn header(&self) -> Result<Map<String, Value>> {
        decode_json_segment(&self.header_b64, "header")
    }

    /// Decode the header segment into its typed form
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedToken`] when the header is missing `alg`
    /// or is otherwise not a valid JOSE header.
    pub fn jose_header(&self) -> Result<JoseHeader> {
        let bytes = base64url_decode(&self.header_b64)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::MalformedToken(format!("invalid JOSE header: {e}")))
    }

    /// Decode the payload segment as a JSON object
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedToken`] when the segment is not base64url
    /// or does not decode to a JSON object.
    pub fn payload(&self) -> Result<Map<String, Value>> {
        decode_json_segment(&self.payload_b64, "payload")
    }

    /// Decode the signature segment to raw bytes
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedSignature`] when the decoded signature is
    /// empty, or [`Error::MalformedToken`] when it is not base64url.
    pub fn signature(&self) -> Result<Vec<u8>> {
        let bytes = base64url_decode(&self.signature_b64)?;
        if bytes.is_empty() {
            return Err(Error::MalformedSignature(
                "empty signature segment".to_string(),
            ));
        }
        Ok(bytes)
    }
}

fn decode_json_segment(segment: &str, what: &str) -> Result<Map<String, Value>> {
    let bytes = base64url_decode(segment)?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::MalformedToken(format!("{what} is not valid JSON: {e}")))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::MalformedToken(format!(
            "{what} is not a JSON object (found {})",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
