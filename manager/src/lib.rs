//! Port proxy manager: web console for Windows port forwarding
//!
//! Rules live in a SQLite table and are mirrored into the OS with netsh:
//! one `portproxy` entry and one inbound firewall allow rule per rule.

pub mod config;
pub mod console;
pub mod host;
pub mod mirror;
pub mod rule;
pub mod store;
pub mod sync;

use std::sync::Arc;

use config::{MirrorBackend, MirrorConfig};
use mirror::{DryRunMirror, NetshMirror, NetworkMirror};

/// Construct the configured mirror backend
pub fn build_mirror(config: &MirrorConfig) -> Arc<dyn NetworkMirror> {
    match config.backend {
        MirrorBackend::Netsh => Arc::new(NetshMirror::new(config.netsh_binary.clone())),
        MirrorBackend::DryRun => Arc::new(DryRunMirror),
    }
}
