//! Local interface lookup, broadcast addresses, and the discovery text format.
//!
//! Discovery datagrams are plain ASCII:
//!
//! ```text
//! request:  CLIPBOARD_SYNC_DISCOVERY
//! response: CLIPBOARD_SYNC_SERVER:<ipv4>:<tcp port>
//! ```

use std::net::Ipv4Addr;

use tracing::warn;

/// An IPv4 interface address with its subnet mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalInterface {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// Subnet broadcast address: every host bit of `ip` set to one.
///
/// `192.168.1.37` with mask `255.255.255.0` gives `192.168.1.255`.
pub fn broadcast_address(ip: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) | !u32::from(netmask))
}

/// Broadcast address of the first non-loopback interface in `interfaces`,
/// or the limited broadcast address `255.255.255.255` if there is none.
pub fn select_broadcast_address(interfaces: &[LocalInterface]) -> Ipv4Addr {
    interfaces
        .iter()
        .find(|iface| !iface.ip.is_loopback())
        .map(|iface| broadcast_address(iface.ip, iface.netmask))
        .unwrap_or(Ipv4Addr::BROADCAST)
}

/// Non-loopback IPv4 interfaces of this machine, in OS order.
///
/// Enumeration failures are logged and yield an empty list.
pub fn local_ipv4_interfaces() -> Vec<LocalInterface> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(list) => list,
        Err(e) => {
            warn!("failed to enumerate network interfaces: {e}");
            return Vec::new();
        }
    };

    interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.addr {
            if_addrs::IfAddr::V4(v4) => Some(LocalInterface {
                ip: v4.ip,
                netmask: v4.netmask,
            }),
            if_addrs::IfAddr::V6(_) => None,
        })
        .collect()
}

/// First non-loopback IPv4 address of this machine.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    local_ipv4_interfaces().first().map(|iface| iface.ip)
}

/// Builds the response datagram text.
pub fn format_response(prefix: &str, ip: Ipv4Addr, tcp_port: u16) -> String {
    format!("{prefix}:{ip}:{tcp_port}")
}

/// Parses `<prefix>:<ip>:<port>`.  Anything else yields `None`.
pub fn parse_response(prefix: &str, text: &str) -> Option<(Ipv4Addr, u16)> {
    let mut parts = text.trim().split(':');
    if parts.next()? != prefix {
        return None;
    }
    let ip = parts.next()?.parse().ok()?;
    let port = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((ip, port))
}
