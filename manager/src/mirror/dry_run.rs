//! Dry-run mirror: logs what netsh would be asked to do

use tracing::info;

use super::netsh::{
    firewall_add_args, firewall_delete_args, port_proxy_add_args, port_proxy_delete_args,
};
use super::{MirrorError, NetworkMirror};

/// Logs the netsh command line of every operation and reports success.
///
/// Used on hosts without netsh. Nothing in the OS changes.
#[derive(Debug, Default)]
pub struct DryRunMirror;

impl DryRunMirror {
    fn log(args: &[String]) {
        info!("[dry-run] netsh {}", args.join(" "));
    }
}

impl NetworkMirror for DryRunMirror {
    fn add_port_forward(
        &self,
        listen_addr: &str,
        listen_port: &str,
        connect_addr: &str,
        connect_port: &str,
    ) -> Result<(), MirrorError> {
        Self::log(&port_proxy_add_args(
            listen_addr,
            listen_port,
            connect_addr,
            connect_port,
        ));
        Ok(())
    }

    fn remove_port_forward(&self, listen_addr: &str, listen_port: &str) -> Result<(), MirrorError> {
        Self::log(&port_proxy_delete_args(listen_addr, listen_port));
        Ok(())
    }

    fn add_firewall_allow(&self, rule_name: &str, listen_port: &str) -> Result<(), MirrorError> {
        Self::log(&firewall_add_args(rule_name, listen_port));
        Ok(())
    }

    fn remove_firewall_allow(&self, rule_name: &str) -> Result<(), MirrorError> {
        Self::log(&firewall_delete_args(rule_name));
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "dry-run"
    }
}
