//! NAT detection and address translation.
//!
//! The coordinator owns an optional STUN client and an externally
//! configured translation address, classifies whether addresses are local,
//! and decides when a peer should be treated as sitting behind NAT. The
//! STUN wire protocol itself is a collaborator behind [`StunProbe`]; this
//! module only consumes its results.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::types::NatType;

/// Resolves NAT classification and external addresses for a STUN server.
///
/// Implemented by the STUN protocol crate; injected into the engine so no
/// hidden global client exists.
#[async_trait]
pub trait StunProbe: Send + Sync {
    /// Classify the NAT between us and `server`.
    async fn nat_type(&self, server: &str) -> NatType;

    /// Our address as seen by `server`, if it can be determined.
    async fn external_address(&self, server: &str) -> Option<IpAddr>;
}

#[derive(Debug, Clone, Copy, Default)]
struct PortRanges {
    udp: (u16, u16),
    rtp: (u16, u16),
}

/// A configured STUN server plus a cached external-address result.
pub struct StunClient {
    server: RwLock<String>,
    probe: Arc<dyn StunProbe>,
    ranges: Mutex<PortRanges>,
    cached_external: Mutex<Option<IpAddr>>,
}

impl StunClient {
    pub fn new(
        server: &str,
        probe: Arc<dyn StunProbe>,
        udp_range: (u16, u16),
        rtp_range: (u16, u16),
    ) -> Self {
        Self {
            server: RwLock::new(server.to_string()),
            probe,
            ranges: Mutex::new(PortRanges {
                udp: udp_range,
                rtp: rtp_range,
            }),
            cached_external: Mutex::new(None),
        }
    }

    pub fn server(&self) -> String {
        self.server.read().clone()
    }

    /// Retarget the client. Drops the cached external address.
    pub fn set_server(&self, server: &str) {
        *self.server.write() = server.to_string();
        self.invalidate_external_address_cache();
    }

    /// Local port ranges the probe should bind within.
    pub fn set_port_ranges(&self, udp_range: (u16, u16), rtp_range: (u16, u16)) {
        let mut ranges = self.ranges.lock();
        ranges.udp = udp_range;
        ranges.rtp = rtp_range;
    }

    pub fn port_ranges(&self) -> ((u16, u16), (u16, u16)) {
        let ranges = self.ranges.lock();
        (ranges.udp, ranges.rtp)
    }

    pub async fn nat_type(&self) -> NatType {
        let server = self.server();
        self.probe.nat_type(&server).await
    }

    /// Cache-through external address query.
    pub async fn external_address(&self) -> Option<IpAddr> {
        if let Some(addr) = *self.cached_external.lock() {
            return Some(addr);
        }
        let server = self.server();
        let addr = self.probe.external_address(&server).await?;
        *self.cached_external.lock() = Some(addr);
        Some(addr)
    }

    /// Forget the cached external address so the next query re-resolves.
    pub fn invalidate_external_address_cache(&self) {
        *self.cached_external.lock() = None;
    }
}

/// NAT state owned by the engine: translation address, optional STUN
/// client, and the known local-interface set.
pub struct NatCoordinator {
    translation_address: RwLock<Option<IpAddr>>,
    stun: RwLock<Option<Arc<StunClient>>>,
    local_interfaces: RwLock<HashSet<IpAddr>>,
    probe: Option<Arc<dyn StunProbe>>,
}

impl NatCoordinator {
    pub fn new(probe: Option<Arc<dyn StunProbe>>) -> Self {
        Self {
            translation_address: RwLock::new(None),
            stun: RwLock::new(None),
            local_interfaces: RwLock::new(HashSet::new()),
            probe,
        }
    }

    /// Whether `ip` is wildcard, broadcast, private, loopback, or one of
    /// our own interface addresses.
    pub fn is_local_address(&self, ip: IpAddr) -> bool {
        ip.is_unspecified()
            || ip.is_loopback()
            || is_broadcast(ip)
            || is_rfc1918(ip)
            || self.local_interfaces.read().contains(&ip)
    }

    pub fn translation_address(&self) -> Option<IpAddr> {
        *self.translation_address.read()
    }

    pub fn set_translation_address(&self, addr: Option<IpAddr>) {
        *self.translation_address.write() = addr;
    }

    /// Rewrite `local` to the configured translation address when talking
    /// to `remote` requires it. `None` means "not translated": either no
    /// translation address is set, `local` is already public, or `remote`
    /// is inside with us and needs none.
    pub fn translate_address(&self, local: IpAddr, remote: IpAddr) -> Option<IpAddr> {
        let translation = (*self.translation_address.read())?;

        if !self.is_local_address(local) {
            return None;
        }
        if self.is_local_address(remote) {
            return None;
        }

        Some(translation)
    }

    /// Heuristic NAT classification for an inbound call.
    ///
    /// Checks translation under two conditions: the peer is public but its
    /// signaling address is private (the peer thinks it is local), or peer
    /// and local are both private yet different. If translating the local
    /// address under those conditions actually changes it, the peer is
    /// treated as NAT'd. Outbound calls are never classified here.
    pub fn is_rtp_nat_enabled(
        &self,
        local_addr: IpAddr,
        peer_addr: IpAddr,
        sig_addr: IpAddr,
        incoming: bool,
    ) -> bool {
        debug!(
            "checking {} call for NAT: local={} peer={} sig={}",
            if incoming { "incoming" } else { "outgoing" },
            local_addr,
            peer_addr,
            sig_addr
        );

        if !incoming {
            return false;
        }

        let peer_thinks_local = !is_rfc1918(peer_addr) && is_rfc1918(sig_addr);
        let both_private_but_different =
            is_rfc1918(peer_addr) && is_rfc1918(local_addr) && local_addr != peer_addr;

        if !peer_thinks_local && !both_private_but_different {
            return false;
        }

        match self.translate_address(local_addr, peer_addr) {
            Some(translated) if translated != local_addr => {
                info!(
                    "signal address {} and peer address {} indicate remote endpoint is behind NAT",
                    sig_addr, peer_addr
                );
                true
            }
            _ => false,
        }
    }

    /// The STUN client to use when reaching `peer`, or `None` when the
    /// peer is local and needs no traversal (or STUN is disabled).
    pub fn stun_for(&self, peer: IpAddr) -> Option<Arc<StunClient>> {
        if self.is_local_address(peer) {
            return None;
        }
        self.stun.read().clone()
    }

    pub fn stun(&self) -> Option<Arc<StunClient>> {
        self.stun.read().clone()
    }

    /// Configure the STUN server. An empty string disables NAT traversal
    /// and releases the client. Otherwise the client is created (or
    /// retargeted), the NAT type queried, and, unless STUN is blocked,
    /// the external address becomes the translation address.
    pub async fn set_stun_server(
        &self,
        server: &str,
        udp_range: (u16, u16),
        rtp_range: (u16, u16),
    ) -> NatType {
        if server.is_empty() {
            *self.stun.write() = None;
            info!("STUN disabled");
            return NatType::Unknown;
        }

        let Some(probe) = self.probe.clone() else {
            warn!("STUN server configured but no probe is available");
            return NatType::Unknown;
        };

        let client = {
            let mut stun = self.stun.write();
            match stun.as_ref() {
                Some(client) => {
                    client.set_server(server);
                    client.clone()
                }
                None => {
                    let client =
                        Arc::new(StunClient::new(server, probe, udp_range, rtp_range));
                    *stun = Some(client.clone());
                    client
                }
            }
        };

        let nat_type = client.nat_type().await;
        if nat_type != NatType::Blocked {
            if let Some(external) = client.external_address().await {
                self.set_translation_address(Some(external));
            }
        }

        info!(
            "STUN server \"{}\" replies {}, external address {:?}",
            server,
            nat_type,
            self.translation_address()
        );
        nat_type
    }

    /// Push updated port ranges into the STUN client, if one exists.
    pub fn update_stun_port_ranges(&self, udp_range: (u16, u16), rtp_range: (u16, u16)) {
        if let Some(client) = self.stun.read().as_ref() {
            client.set_port_ranges(udp_range, rtp_range);
        }
    }

    pub(crate) fn on_interface_added(&self, ip: IpAddr) {
        self.local_interfaces.write().insert(ip);
        if let Some(client) = self.stun.read().as_ref() {
            client.invalidate_external_address_cache();
        }
    }

    pub(crate) fn on_interface_removed(&self, ip: IpAddr) {
        self.local_interfaces.write().remove(&ip);
        if let Some(client) = self.stun.read().as_ref() {
            client.invalidate_external_address_cache();
        }
    }
}

fn is_broadcast(ip: IpAddr) -> bool {
    matches!(ip, IpAddr::V4(v4) if v4 == Ipv4Addr::BROADCAST)
}

/// RFC 1918 private address (IPv4 only).
fn is_rfc1918(ip: IpAddr) -> bool {
    matches!(ip, IpAddr::V4(v4) if v4.is_private())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn local_address_classification() {
        let nat = NatCoordinator::new(None);
        assert!(nat.is_local_address(ip("0.0.0.0")));
        assert!(nat.is_local_address(ip("255.255.255.255")));
        assert!(nat.is_local_address(ip("127.0.0.1")));
        assert!(nat.is_local_address(ip("10.1.2.3")));
        assert!(nat.is_local_address(ip("172.16.0.1")));
        assert!(nat.is_local_address(ip("192.168.1.1")));
        assert!(!nat.is_local_address(ip("8.8.8.8")));
        assert!(!nat.is_local_address(ip("172.32.0.1")));
    }

    #[test]
    fn interface_addresses_count_as_local() {
        let nat = NatCoordinator::new(None);
        assert!(!nat.is_local_address(ip("203.0.113.7")));
        nat.on_interface_added(ip("203.0.113.7"));
        assert!(nat.is_local_address(ip("203.0.113.7")));
        nat.on_interface_removed(ip("203.0.113.7"));
        assert!(!nat.is_local_address(ip("203.0.113.7")));
    }

    #[test]
    fn translate_requires_configured_address() {
        let nat = NatCoordinator::new(None);
        assert_eq!(nat.translate_address(ip("10.0.0.1"), ip("8.8.8.8")), None);

        nat.set_translation_address(Some(ip("198.51.100.9")));
        assert_eq!(
            nat.translate_address(ip("10.0.0.1"), ip("8.8.8.8")),
            Some(ip("198.51.100.9"))
        );
        // Already public: nothing to translate.
        assert_eq!(nat.translate_address(ip("198.51.100.1"), ip("8.8.8.8")), None);
        // Remote is inside with us: no translation needed.
        assert_eq!(nat.translate_address(ip("10.0.0.1"), ip("10.0.0.2")), None);
    }
}
