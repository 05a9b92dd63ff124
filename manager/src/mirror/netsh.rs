//! netsh-backed mirror
//!
//! `netsh interface portproxy` for forwarding, `netsh advfirewall firewall` for
//! inbound allow rules. Each value goes in its own argv entry; no shell.

use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, error};

use super::{MirrorError, MirrorErrorKind, NetworkMirror};

/// Firewall rules are always created for TCP
const FIREWALL_PROTOCOL: &str = "TCP";

pub(crate) fn port_proxy_add_args(
    listen_addr: &str,
    listen_port: &str,
    connect_addr: &str,
    connect_port: &str,
) -> Vec<String> {
    vec![
        "interface".into(),
        "portproxy".into(),
        "add".into(),
        "v4tov4".into(),
        format!("listenaddress={listen_addr}"),
        format!("listenport={listen_port}"),
        format!("connectaddress={connect_addr}"),
        format!("connectport={connect_port}"),
    ]
}

pub(crate) fn port_proxy_delete_args(listen_addr: &str, listen_port: &str) -> Vec<String> {
    vec![
        "interface".into(),
        "portproxy".into(),
        "delete".into(),
        "v4tov4".into(),
        format!("listenaddress={listen_addr}"),
        format!("listenport={listen_port}"),
    ]
}

pub(crate) fn firewall_add_args(rule_name: &str, listen_port: &str) -> Vec<String> {
    vec![
        "advfirewall".into(),
        "firewall".into(),
        "add".into(),
        "rule".into(),
        format!("name={rule_name}"),
        format!("protocol={FIREWALL_PROTOCOL}"),
        "dir=in".into(),
        format!("localport={listen_port}"),
        "action=allow".into(),
    ]
}

pub(crate) fn firewall_delete_args(rule_name: &str) -> Vec<String> {
    vec![
        "advfirewall".into(),
        "firewall".into(),
        "delete".into(),
        "rule".into(),
        format!("name={rule_name}"),
    ]
}

/// Runs `netsh` for every mirror operation
pub struct NetshMirror {
    binary: PathBuf,
}

impl NetshMirror {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run one netsh invocation; the exit status is the only success signal.
    fn run(&self, kind: MirrorErrorKind, args: &[String]) -> Result<(), MirrorError> {
        debug!("Running {} {}", self.binary.display(), args.join(" "));

        let output = Command::new(&self.binary).args(args).output().map_err(|e| {
            error!("Failed to execute {}: {e}", self.binary.display());
            MirrorError::new(kind, format!("failed to execute {}: {e}", self.binary.display()))
        })?;

        if output.status.success() {
            return Ok(());
        }

        // netsh reports most errors on stdout
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };

        let status = match output.status.code() {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        };
        error!("netsh {} failed ({status}): {message}", args.join(" "));

        let detail = if message.is_empty() {
            status
        } else {
            format!("{status}: {message}")
        };
        Err(MirrorError::new(kind, detail))
    }
}

impl NetworkMirror for NetshMirror {
    fn add_port_forward(
        &self,
        listen_addr: &str,
        listen_port: &str,
        connect_addr: &str,
        connect_port: &str,
    ) -> Result<(), MirrorError> {
        self.run(
            MirrorErrorKind::PortProxyAddFailed,
            &port_proxy_add_args(listen_addr, listen_port, connect_addr, connect_port),
        )
    }

    fn remove_port_forward(&self, listen_addr: &str, listen_port: &str) -> Result<(), MirrorError> {
        self.run(
            MirrorErrorKind::PortProxyRemoveFailed,
            &port_proxy_delete_args(listen_addr, listen_port),
        )
    }

    fn add_firewall_allow(&self, rule_name: &str, listen_port: &str) -> Result<(), MirrorError> {
        self.run(
            MirrorErrorKind::FirewallAddFailed,
            &firewall_add_args(rule_name, listen_port),
        )
    }

    fn remove_firewall_allow(&self, rule_name: &str) -> Result<(), MirrorError> {
        self.run(
            MirrorErrorKind::FirewallRemoveFailed,
            &firewall_delete_args(rule_name),
        )
    }

    fn backend(&self) -> &'static str {
        "netsh"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_proxy_add_args() {
        let args = port_proxy_add_args("0.0.0.0", "8080", "10.0.0.5", "80");
        assert_eq!(
            args,
            vec![
                "interface",
                "portproxy",
                "add",
                "v4tov4",
                "listenaddress=0.0.0.0",
                "listenport=8080",
                "connectaddress=10.0.0.5",
                "connectport=80",
            ]
        );
    }

    #[test]
    fn test_port_proxy_delete_args() {
        let args = port_proxy_delete_args("0.0.0.0", "8080");
        assert_eq!(
            args,
            vec![
                "interface",
                "portproxy",
                "delete",
                "v4tov4",
                "listenaddress=0.0.0.0",
                "listenport=8080",
            ]
        );
    }

    #[test]
    fn test_firewall_add_args() {
        let args = firewall_add_args("web", "8080");
        assert_eq!(
            args,
            vec![
                "advfirewall",
                "firewall",
                "add",
                "rule",
                "name=web",
                "protocol=TCP",
                "dir=in",
                "localport=8080",
                "action=allow",
            ]
        );
    }

    #[test]
    fn test_firewall_delete_args() {
        let args = firewall_delete_args("web");
        assert_eq!(args, vec!["advfirewall", "firewall", "delete", "rule", "name=web"]);
    }

    #[test]
    fn test_missing_binary_maps_to_kind() {
        let mirror = NetshMirror::new("/nonexistent/netsh-binary");
        let err = mirror.remove_firewall_allow("web").unwrap_err();
        assert_eq!(err.kind, MirrorErrorKind::FirewallRemoveFailed);
        assert!(err.detail.contains("failed to execute"));
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_decides() {
        // `true` and `false` ignore their arguments
        let ok = NetshMirror::new("true");
        assert!(ok.add_port_forward("0.0.0.0", "8080", "10.0.0.5", "80").is_ok());

        let failing = NetshMirror::new("false");
        let err = failing.add_firewall_allow("web", "8080").unwrap_err();
        assert_eq!(err.kind, MirrorErrorKind::FirewallAddFailed);
        assert!(err.detail.starts_with("exit code 1"));
    }
}
