//! Thin boundary around the WiFi driver wrapper (spec.md §1 Non-goals: out
//! of scope, interface only). Mirrors `original_source/firmware/wifi.py`'s
//! `nic`/`connected`/`resolve` surface.

use smoltcp::wire::IpAddress;

use crate::error::NetError;

pub trait WifiLink {
    /// `wifi.connected` in the original — true once station mode has
    /// associated and obtained an address.
    fn is_connected(&self) -> bool;

    /// DNS-resolve `host`. The modem call-attempt sequence (spec.md §4.D)
    /// treats a resolution failure the same as "no network": `NO_NETWORK`
    /// tone, no retry.
    fn resolve(&self, host: &str) -> Result<IpAddress, NetError>;
}

/// Test/bring-up double: reports a fixed connectivity state and resolves
/// through a short static table instead of a real DNS client.
pub struct StaticWifiLink {
    connected: bool,
    table: heapless::Vec<(heapless::String<64>, IpAddress), 8>,
}

impl StaticWifiLink {
    pub fn new(connected: bool) -> Self {
        Self {
            connected,
            table: heapless::Vec::new(),
        }
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn add_host(&mut self, host: &str, addr: IpAddress) {
        let _ = self
            .table
            .push((heapless::String::try_from(host).unwrap_or_default(), addr));
    }
}

impl WifiLink for StaticWifiLink {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn resolve(&self, host: &str) -> Result<IpAddress, NetError> {
        if !self.connected {
            return Err(NetError::NoWifi);
        }
        self.table
            .iter()
            .find(|(h, _)| h.as_str() == host)
            .map(|(_, addr)| *addr)
            .ok_or(NetError::DnsFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnected_link_fails_before_lookup() {
        let link = StaticWifiLink::new(false);
        assert_eq!(link.resolve("bbs.example.com"), Err(NetError::NoWifi));
    }

    #[test]
    fn unknown_host_is_dns_failure() {
        let link = StaticWifiLink::new(true);
        assert_eq!(link.resolve("bbs.example.com"), Err(NetError::DnsFailed));
    }

    #[test]
    fn known_host_resolves() {
        let mut link = StaticWifiLink::new(true);
        link.add_host("bbs.example.com", IpAddress::v4(10, 0, 0, 1));
        assert_eq!(
            link.resolve("bbs.example.com"),
            Ok(IpAddress::v4(10, 0, 0, 1))
        );
    }
}
