//! Descriptor parsing and validation
//!
//! Store records carry an opaque `config` payload that is either a raw JSON
//! document or the base64 encoding of one; [`parse_record`] autodetects by
//! trial decode. Validation collects every rule violation instead of
//! stopping at the first so operators can fix a descriptor in one pass.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use url::Url;

use alertroute_common::{Error, PayloadFormat, Result, TargetDescriptor, TargetType};

/// DNS-1123 subdomain label, 1-63 characters.
static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("name pattern"));

const MAX_NAME_LEN: usize = 63;

/// Descriptor as decoded from the store, before validation.
///
/// Enum-valued fields stay strings here so a bad `type` or `format` surfaces
/// as a validation violation alongside the others rather than a decode error.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub format: String,
    pub enabled: Option<bool>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub filter_config: HashMap<String, serde_json::Value>,
}

impl RawDescriptor {
    /// Collect every validation violation. Empty result means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if self.name.is_empty() {
            violations.push("name is required".to_string());
        } else if self.name.len() > MAX_NAME_LEN || !NAME_PATTERN.is_match(&self.name) {
            violations.push(format!(
                "name {:?} must be a DNS-1123 subdomain label (1-{MAX_NAME_LEN} chars)",
                self.name
            ));
        }

        let target_type = if self.target_type.is_empty() {
            violations.push("type is required".to_string());
            None
        } else {
            let parsed = TargetType::parse(&self.target_type);
            if parsed.is_none() {
                violations.push(format!(
                    "type {:?} must be one of rootly, pagerduty, slack, webhook",
                    self.target_type
                ));
            }
            parsed
        };

        let format = if self.format.is_empty() {
            violations.push("format is required".to_string());
            None
        } else {
            let parsed = PayloadFormat::parse(&self.format);
            if parsed.is_none() {
                violations.push(format!(
                    "format {:?} must be one of alertmanager, rootly, pagerduty, slack, webhook",
                    self.format
                ));
            }
            parsed
        };

        if self.url.is_empty() {
            violations.push("url is required".to_string());
        } else {
            match Url::parse(&self.url) {
                Ok(url) => {
                    if url.scheme() != "http" && url.scheme() != "https" {
                        violations.push(format!(
                            "url scheme {:?} must be http or https",
                            url.scheme()
                        ));
                    }
                    if url.host_str().map_or(true, str::is_empty) {
                        violations.push("url host must not be empty".to_string());
                    }
                }
                Err(err) => violations.push(format!("url is not valid: {err}")),
            }
        }

        if let (Some(target_type), Some(format)) = (target_type, format) {
            if !target_type.compatible_formats().contains(&format) {
                violations.push(format!(
                    "format {format} is not compatible with type {target_type}"
                ));
            }
        }

        for (key, value) in &self.headers {
            if key.trim().is_empty() {
                violations.push("header keys must not be empty".to_string());
            }
            if value.trim().is_empty() {
                violations.push(format!("header {key:?} has an empty value"));
            }
        }

        violations
    }

    /// Convert into a typed descriptor, applying defaults.
    ///
    /// Callers run [`RawDescriptor::validate`] first; a conversion failure
    /// here means validation was skipped.
    pub fn into_descriptor(self) -> Result<TargetDescriptor> {
        let target_type = TargetType::parse(&self.target_type)
            .ok_or_else(|| Error::Validation(format!("unknown type {:?}", self.target_type)))?;
        let format = PayloadFormat::parse(&self.format)
            .ok_or_else(|| Error::Validation(format!("unknown format {:?}", self.format)))?;

        Ok(TargetDescriptor {
            name: self.name,
            target_type,
            url: self.url,
            format,
            enabled: self.enabled.unwrap_or(true),
            headers: self.headers,
            filter_config: self.filter_config,
        })
    }
}

/// Decode the `config` payload of a store record into a raw descriptor.
pub fn parse_record(record: &crate::store::ConfigRecord) -> Result<RawDescriptor> {
    let payload = record
        .data
        .get("config")
        .ok_or_else(|| Error::InvalidFormat("missing 'config' key".to_string()))?;

    let trimmed = trim_ascii_whitespace(payload);
    if trimmed.is_empty() {
        return Err(Error::InvalidFormat("empty config payload".to_string()));
    }

    let document = decode_payload(trimmed)?;
    serde_json::from_slice(&document)
        .map_err(|err| Error::InvalidFormat(format!("invalid JSON: {err}")))
}

/// Parse and fully validate a record into a registry-ready descriptor.
pub fn parse_and_validate(record: &crate::store::ConfigRecord) -> Result<TargetDescriptor> {
    let raw = parse_record(record)?;
    let violations = raw.validate();
    if !violations.is_empty() {
        return Err(Error::Validation(violations.join("; ")));
    }
    raw.into_descriptor()
}

/// Base64-or-raw autodetect: a successful base64 decode wins; otherwise the
/// payload is treated as raw JSON. A payload that is neither base64 nor
/// JSON-shaped reports the base64 failure, since that is what it was
/// presumably meant to be.
fn decode_payload(trimmed: &[u8]) -> Result<Vec<u8>> {
    match BASE64.decode(trimmed) {
        Ok(decoded) => Ok(decoded),
        Err(b64_err) => {
            if trimmed.first() == Some(&b'{') {
                Ok(trimmed.to_vec())
            } else {
                Err(Error::InvalidFormat(format!("invalid base64: {b64_err}")))
            }
        }
    }
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}
