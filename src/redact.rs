//! Sensitive-data redaction for logged headers and bodies.
//!
//! Redaction only ever runs on the *logged copy* of an exchange. The bytes
//! delivered to the real caller or callee are never touched.

use axum::http::{HeaderMap, HeaderValue};
use serde_json::Value;
use serde::Deserialize;
use std::collections::HashSet;

use crate::types::BodySnapshot;

/// Replacement string substituted for sensitive values when no custom mask is
/// configured.
pub const DEFAULT_MASK: &str = "******";

/// Marker logged in place of a body whose bytes cannot be decoded under the
/// declared character encoding.
pub const UNREADABLE_BODY: &str = "Content read error";

/// Which header names and JSON field names must be masked before logging.
///
/// Matching is exact-name and case-insensitive; there is no wildcard or
/// path-based matching. The policy is loaded once at startup and shared
/// read-only across all concurrent exchanges, typically as an
/// `Arc<SensitivityPolicy>`.
///
/// The policy deserializes from plain string lists, so it can be embedded in
/// whatever configuration format the host application already uses:
///
/// ```
/// use wiretrace::SensitivityPolicy;
///
/// let policy: SensitivityPolicy = serde_json::from_str(
///     r####"{ "headers": ["Authorization"], "fields": ["token"], "mask": "###" }"####,
/// ).unwrap();
/// assert!(policy.is_sensitive_header("authorization"));
/// assert_eq!(policy.mask(), "###");
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(from = "PolicyConfig")]
pub struct SensitivityPolicy {
    headers: HashSet<String>,
    fields: HashSet<String>,
    mask: String,
}

/// Plain-string form of [`SensitivityPolicy`] as it appears in configuration
/// files. Name matching is normalized at construction, so the lists may use
/// any casing.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub headers: Vec<String>,
    pub fields: Vec<String>,
    pub mask: Option<String>,
}

impl From<PolicyConfig> for SensitivityPolicy {
    fn from(config: PolicyConfig) -> Self {
        let mut policy = SensitivityPolicy::new(config.headers, config.fields);
        if let Some(mask) = config.mask {
            policy.mask = mask;
        }
        policy
    }
}

impl SensitivityPolicy {
    /// Build a policy from sensitive header names and sensitive JSON field
    /// names, with the default mask token.
    pub fn new<H, F>(headers: H, fields: F) -> Self
    where
        H: IntoIterator,
        H::Item: AsRef<str>,
        F: IntoIterator,
        F::Item: AsRef<str>,
    {
        Self {
            headers: headers
                .into_iter()
                .map(|name| name.as_ref().to_ascii_lowercase())
                .collect(),
            fields: fields
                .into_iter()
                .map(|name| name.as_ref().to_ascii_lowercase())
                .collect(),
            mask: DEFAULT_MASK.to_owned(),
        }
    }

    /// Replace the mask token.
    pub fn with_mask(mut self, mask: impl Into<String>) -> Self {
        self.mask = mask.into();
        self
    }

    pub fn is_sensitive_header(&self, name: &str) -> bool {
        self.headers.contains(&name.to_ascii_lowercase())
    }

    pub fn is_sensitive_field(&self, name: &str) -> bool {
        self.fields.contains(&name.to_ascii_lowercase())
    }

    pub fn mask(&self) -> &str {
        &self.mask
    }
}

impl Default for SensitivityPolicy {
    /// Masks the `Authorization` header and the usual credential-bearing JSON
    /// fields: `password`, `token`, `credit_card`, `ssn`.
    fn default() -> Self {
        Self::new(["authorization"], ["password", "token", "credit_card", "ssn"])
    }
}

/// Copy a header map, replacing every value of a sensitive name with the mask
/// token. Name order and per-name value counts are preserved; non-matching
/// values are copied verbatim.
pub fn redact_headers(headers: &HeaderMap, policy: &SensitivityPolicy) -> HeaderMap {
    let mask = HeaderValue::from_str(policy.mask())
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_MASK));

    let mut redacted = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if policy.is_sensitive_header(name.as_str()) {
            redacted.append(name.clone(), mask.clone());
        } else {
            redacted.append(name.clone(), value.clone());
        }
    }
    redacted
}

/// Produce the loggable text of a body snapshot.
///
/// Non-JSON content types and empty bodies pass through undecorated. JSON
/// bodies are parsed and masked field-by-field; a body that declares JSON but
/// fails to parse is logged as-is. Bytes that cannot be decoded under the
/// declared encoding yield the [`UNREADABLE_BODY`] marker. Nothing in here
/// can fail the exchange.
pub fn redact_body(body: &BodySnapshot, policy: &SensitivityPolicy) -> String {
    let Some(text) = body.text() else {
        return UNREADABLE_BODY.to_owned();
    };
    if text.is_empty() || !is_json_media_type(body.content_type()) {
        return text;
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(tree) => match serde_json::to_string(&mask_value(tree, policy)) {
            Ok(masked) => masked,
            Err(_) => text,
        },
        // Malformed despite a JSON content type: log the original text.
        Err(_) => text,
    }
}

/// Masking is field-name-driven: a matched key is replaced with the mask
/// token whatever its value was, including whole objects and arrays.
fn mask_value(value: Value, policy: &SensitivityPolicy) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, val)| {
                    if policy.is_sensitive_field(&key) {
                        (key, Value::String(policy.mask().to_owned()))
                    } else if val.is_object() || val.is_array() {
                        (key, mask_value(val, policy))
                    } else {
                        (key, val)
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| mask_value(item, policy))
                .collect(),
        ),
        scalar => scalar,
    }
}

/// `application/json`, `application/problem+json`, etc. Matches the media
/// type only, ignoring parameters.
fn is_json_media_type(content_type: Option<&str>) -> bool {
    let Some(raw) = content_type else {
        return false;
    };
    let media_type = raw.split(';').next().unwrap_or(raw);
    media_type.trim().to_ascii_lowercase().contains("json")
}
