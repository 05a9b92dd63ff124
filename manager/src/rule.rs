//! Port-forwarding rule model

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A persisted rule, as returned by the rule store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub listen_address: String,
    pub listen_port: String,
    pub connect_address: String,
    pub connect_port: String,
}

/// A rule that has not been stored yet.
///
/// Field names match the form fields posted to `/add`. Missing fields
/// deserialize as empty strings and are rejected by [`NewRule::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NewRule {
    #[serde(rename = "rule_name", default)]
    pub name: String,
    #[serde(default)]
    pub listen_address: String,
    #[serde(default)]
    pub listen_port: String,
    #[serde(default)]
    pub connect_address: String,
    #[serde(default)]
    pub connect_port: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("rule name must not be empty")]
    EmptyName,

    #[error("rule name '{0}' is reserved by netsh")]
    ReservedName(String),

    #[error("{field} must not be empty")]
    EmptyAddress { field: &'static str },

    #[error("{field} '{value}' must not contain spaces or '='")]
    MalformedAddress { field: &'static str, value: String },

    #[error("{field} '{value}' is not a port between 1 and 65535")]
    InvalidPort { field: &'static str, value: String },
}

impl NewRule {
    pub fn new(
        name: impl Into<String>,
        listen_address: impl Into<String>,
        listen_port: impl Into<String>,
        connect_address: impl Into<String>,
        connect_port: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            listen_address: listen_address.into(),
            listen_port: listen_port.into(),
            connect_address: connect_address.into(),
            connect_port: connect_port.into(),
        }
    }

    /// Trim every field and check it can be handed to netsh as a single argument.
    ///
    /// Ports come back in canonical decimal form, so `"080"` is stored as `"80"`.
    pub fn validate(self) -> Result<Self, RuleError> {
        let name = check_name(self.name.trim())?;
        let listen_address = self.listen_address.trim();
        let connect_address = self.connect_address.trim();

        check_address("listen_address", listen_address)?;
        let listen_port = check_port("listen_port", self.listen_port.trim())?;
        check_address("connect_address", connect_address)?;
        let connect_port = check_port("connect_port", self.connect_port.trim())?;

        Ok(Self {
            name,
            listen_address: listen_address.to_string(),
            listen_port: listen_port.to_string(),
            connect_address: connect_address.to_string(),
            connect_port: connect_port.to_string(),
        })
    }

    /// Attach the id assigned by the store
    pub fn with_id(self, id: i64) -> Rule {
        Rule {
            id,
            name: self.name,
            listen_address: self.listen_address,
            listen_port: self.listen_port,
            connect_address: self.connect_address,
            connect_port: self.connect_port,
        }
    }
}

/// `netsh advfirewall firewall delete rule name=all` matches every rule on the host
const RESERVED_NAMES: &[&str] = &["all"];

pub(crate) fn check_name(name: &str) -> Result<String, RuleError> {
    if name.is_empty() {
        return Err(RuleError::EmptyName);
    }
    if RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name)) {
        return Err(RuleError::ReservedName(name.to_string()));
    }
    Ok(name.to_string())
}

fn check_address(field: &'static str, value: &str) -> Result<(), RuleError> {
    if value.is_empty() {
        return Err(RuleError::EmptyAddress { field });
    }
    if value.contains(char::is_whitespace) || value.contains('=') {
        return Err(RuleError::MalformedAddress {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Digits only; `u16::from_str` alone would also take a leading `+`
fn check_port(field: &'static str, value: &str) -> Result<u16, RuleError> {
    let invalid = || RuleError::InvalidPort {
        field,
        value: value.to_string(),
    };
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    match value.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(invalid()),
    }
}
