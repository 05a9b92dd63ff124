//! OS Network Mirror: port-proxy and firewall entries matching stored rules.
//!
//! Backends:
//! - [`NetshMirror`]: runs `netsh` (Windows)
//! - [`DryRunMirror`]: logs the `netsh` command lines and reports success
//! - `RecordingMirror` (`test-util` feature): in-process fake that records calls and emulates both OS tables

mod dry_run;
mod netsh;
#[cfg(any(test, feature = "test-util"))]
mod recording;

pub use dry_run::DryRunMirror;
pub use netsh::NetshMirror;
#[cfg(any(test, feature = "test-util"))]
pub use recording::{MirrorCall, RecordingMirror};

use std::fmt;
use thiserror::Error;

/// Which of the four mirror operations failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirrorErrorKind {
    PortProxyAddFailed,
    PortProxyRemoveFailed,
    FirewallAddFailed,
    FirewallRemoveFailed,
}

impl fmt::Display for MirrorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::PortProxyAddFailed => "failed to add port proxy",
            Self::PortProxyRemoveFailed => "failed to remove port proxy",
            Self::FirewallAddFailed => "failed to add firewall rule",
            Self::FirewallRemoveFailed => "failed to remove firewall rule",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct MirrorError {
    pub kind: MirrorErrorKind,
    pub detail: String,
}

impl MirrorError {
    pub fn new(kind: MirrorErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// The four OS-side operations the rule synchronizer needs.
///
/// Every call blocks until the underlying command exits. There is no retry and
/// no timeout.
pub trait NetworkMirror: Send + Sync {
    fn add_port_forward(
        &self,
        listen_addr: &str,
        listen_port: &str,
        connect_addr: &str,
        connect_port: &str,
    ) -> Result<(), MirrorError>;

    fn remove_port_forward(&self, listen_addr: &str, listen_port: &str) -> Result<(), MirrorError>;

    fn add_firewall_allow(&self, rule_name: &str, listen_port: &str) -> Result<(), MirrorError>;

    fn remove_firewall_allow(&self, rule_name: &str) -> Result<(), MirrorError>;

    /// Short backend name for logs and the health endpoint
    fn backend(&self) -> &'static str;
}
