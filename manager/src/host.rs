//! LAN address shown on the home page

use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use std::net::Ipv4Addr;
use tracing::warn;

/// First private, non-loopback IPv4 address of this host, or 127.0.0.1
pub fn router_ip() -> Ipv4Addr {
    match NetworkInterface::show() {
        Ok(interfaces) => select_router_ip(interfaces.iter().flat_map(|iface| {
            iface.addr.iter().filter_map(|addr| match addr {
                Addr::V4(v4) => Some(v4.ip),
                Addr::V6(_) => None,
            })
        })),
        Err(e) => {
            warn!("Failed to enumerate network interfaces: {e}");
            Ipv4Addr::LOCALHOST
        }
    }
}

/// Pick the first RFC 1918 address (10/8, 172.16/12, 192.168/16)
pub fn select_router_ip(addrs: impl IntoIterator<Item = Ipv4Addr>) -> Ipv4Addr {
    addrs
        .into_iter()
        .find(|ip| !ip.is_loopback() && ip.is_private())
        .unwrap_or(Ipv4Addr::LOCALHOST)
}
