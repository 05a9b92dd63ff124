//! In-process mirror for tests and local experiments

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::{MirrorError, MirrorErrorKind, NetworkMirror};

/// One attempted mirror operation, recorded whether it succeeded or not
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorCall {
    AddPortForward {
        listen_addr: String,
        listen_port: String,
        connect_addr: String,
        connect_port: String,
    },
    RemovePortForward {
        listen_addr: String,
        listen_port: String,
    },
    AddFirewallAllow {
        rule_name: String,
        listen_port: String,
    },
    RemoveFirewallAllow {
        rule_name: String,
    },
}

#[derive(Default)]
struct Tables {
    calls: Vec<MirrorCall>,
    /// (listen addr, listen port) -> (connect addr, connect port)
    forwards: BTreeMap<(String, String), (String, String)>,
    /// (rule name, local port); names may repeat like in the Windows firewall
    firewall: Vec<(String, String)>,
    failing: HashSet<MirrorErrorKind>,
}

/// Records every call and keeps port-proxy and firewall tables the way netsh would.
///
/// Adding a port-proxy entry for an endpoint that already has one fails, and so
/// does removing an entry or firewall rule that does not exist. Any operation
/// kind can additionally be forced to fail with [`RecordingMirror::fail_on`].
#[derive(Default)]
pub struct RecordingMirror {
    tables: Mutex<Tables>,
}

impl RecordingMirror {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        // A panicking test thread must not hide the recorded state from the others
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every subsequent operation of `kind` fail
    pub fn fail_on(&self, kind: MirrorErrorKind) {
        self.tables().failing.insert(kind);
    }

    pub fn clear_failures(&self) {
        self.tables().failing.clear();
    }

    pub fn calls(&self) -> Vec<MirrorCall> {
        self.tables().calls.clone()
    }

    /// Connect endpoint of the port-proxy entry listening on `addr:port`
    pub fn port_forward(&self, listen_addr: &str, listen_port: &str) -> Option<(String, String)> {
        self.tables()
            .forwards
            .get(&(listen_addr.to_string(), listen_port.to_string()))
            .cloned()
    }

    pub fn port_forward_count(&self) -> usize {
        self.tables().forwards.len()
    }

    /// Local ports of every firewall rule named `rule_name`
    pub fn firewall_ports(&self, rule_name: &str) -> Vec<String> {
        self.tables()
            .firewall
            .iter()
            .filter(|(name, _)| name == rule_name)
            .map(|(_, port)| port.clone())
            .collect()
    }

    pub fn firewall_rule_count(&self) -> usize {
        self.tables().firewall.len()
    }

    fn injected(tables: &Tables, kind: MirrorErrorKind) -> Result<(), MirrorError> {
        if tables.failing.contains(&kind) {
            return Err(MirrorError::new(kind, "exit code 1: injected failure"));
        }
        Ok(())
    }
}

impl NetworkMirror for RecordingMirror {
    fn add_port_forward(
        &self,
        listen_addr: &str,
        listen_port: &str,
        connect_addr: &str,
        connect_port: &str,
    ) -> Result<(), MirrorError> {
        let mut tables = self.tables();
        tables.calls.push(MirrorCall::AddPortForward {
            listen_addr: listen_addr.to_string(),
            listen_port: listen_port.to_string(),
            connect_addr: connect_addr.to_string(),
            connect_port: connect_port.to_string(),
        });
        Self::injected(&tables, MirrorErrorKind::PortProxyAddFailed)?;

        let key = (listen_addr.to_string(), listen_port.to_string());
        if tables.forwards.contains_key(&key) {
            return Err(MirrorError::new(
                MirrorErrorKind::PortProxyAddFailed,
                format!("exit code 1: {listen_addr}:{listen_port} is already forwarded"),
            ));
        }
        tables
            .forwards
            .insert(key, (connect_addr.to_string(), connect_port.to_string()));
        Ok(())
    }

    fn remove_port_forward(&self, listen_addr: &str, listen_port: &str) -> Result<(), MirrorError> {
        let mut tables = self.tables();
        tables.calls.push(MirrorCall::RemovePortForward {
            listen_addr: listen_addr.to_string(),
            listen_port: listen_port.to_string(),
        });
        Self::injected(&tables, MirrorErrorKind::PortProxyRemoveFailed)?;

        let key = (listen_addr.to_string(), listen_port.to_string());
        match tables.forwards.remove(&key) {
            Some(_) => Ok(()),
            None => Err(MirrorError::new(
                MirrorErrorKind::PortProxyRemoveFailed,
                "exit code 1: The system cannot find the file specified.",
            )),
        }
    }

    fn add_firewall_allow(&self, rule_name: &str, listen_port: &str) -> Result<(), MirrorError> {
        let mut tables = self.tables();
        tables.calls.push(MirrorCall::AddFirewallAllow {
            rule_name: rule_name.to_string(),
            listen_port: listen_port.to_string(),
        });
        Self::injected(&tables, MirrorErrorKind::FirewallAddFailed)?;

        tables
            .firewall
            .push((rule_name.to_string(), listen_port.to_string()));
        Ok(())
    }

    fn remove_firewall_allow(&self, rule_name: &str) -> Result<(), MirrorError> {
        let mut tables = self.tables();
        tables.calls.push(MirrorCall::RemoveFirewallAllow {
            rule_name: rule_name.to_string(),
        });
        Self::injected(&tables, MirrorErrorKind::FirewallRemoveFailed)?;

        // netsh deletes every rule carrying the name
        let before = tables.firewall.len();
        tables.firewall.retain(|(name, _)| name != rule_name);
        if tables.firewall.len() == before {
            return Err(MirrorError::new(
                MirrorErrorKind::FirewallRemoveFailed,
                "exit code 1: No rules match the specified criteria.",
            ));
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "recording"
    }
}
