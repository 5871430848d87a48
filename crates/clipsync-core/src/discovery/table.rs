//! Table of servers found through discovery, keyed by `ip:port`.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A server that answered a discovery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredServer {
    pub ip: Ipv4Addr,
    pub port: u16,
    /// Source address of the response datagram.
    pub hostname: String,
    pub last_seen: DateTime<Utc>,
}

impl DiscoveredServer {
    pub fn key(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip, self.port)
    }
}

#[derive(Debug, Default)]
pub struct DiscoveryTable {
    servers: HashMap<SocketAddrV4, DiscoveredServer>,
}

impl DiscoveryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a response.  Returns `true` the first time a key is seen;
    /// later calls only refresh `last_seen` and `hostname`.
    pub fn record(&mut self, server: DiscoveredServer) -> bool {
        match self.servers.get_mut(&server.key()) {
            Some(existing) => {
                existing.last_seen = server.last_seen;
                existing.hostname = server.hostname;
                false
            }
            None => {
                self.servers.insert(server.key(), server);
                true
            }
        }
    }

    pub fn get(&self, key: &SocketAddrV4) -> Option<&DiscoveredServer> {
        self.servers.get(key)
    }

    /// All known servers, most recently seen first.
    pub fn snapshot(&self) -> Vec<DiscoveredServer> {
        let mut list: Vec<_> = self.servers.values().cloned().collect();
        list.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        list
    }

    pub fn clear(&mut self) {
        self.servers.clear();
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn server(last_octet: u8, port: u16, seen: DateTime<Utc>) -> DiscoveredServer {
        DiscoveredServer {
            ip: Ipv4Addr::new(192, 168, 1, last_octet),
            port,
            hostname: format!("192.168.1.{last_octet}"),
            last_seen: seen,
        }
    }

    #[test]
    fn test_record_same_key_twice_reports_new_once_and_refreshes_last_seen() {
        // Arrange
        let mut table = DiscoveryTable::new();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(5);

        // Act
        let first = table.record(server(5, 8888, t0));
        let second = table.record(server(5, 8888, t1));

        // Assert
        assert!(first);
        assert!(!second);
        assert_eq!(table.len(), 1);
        let key = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 5), 8888);
        assert_eq!(table.get(&key).unwrap().last_seen, t1);
    }

    #[test]
    fn test_same_ip_different_port_is_a_separate_server() {
        let mut table = DiscoveryTable::new();
        let now = Utc::now();
        assert!(table.record(server(5, 8888, now)));
        assert!(table.record(server(5, 8889, now)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_snapshot_orders_most_recent_first_and_clear_empties() {
        // Arrange
        let mut table = DiscoveryTable::new();
        let t0 = Utc::now();
        table.record(server(1, 8888, t0));
        table.record(server(2, 8888, t0 + Duration::seconds(1)));

        // Act
        let list = table.snapshot();
        table.clear();

        // Assert
        assert_eq!(list[0].ip, Ipv4Addr::new(192, 168, 1, 2));
        assert!(table.is_empty());
    }
}
