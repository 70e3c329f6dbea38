use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};

use serde::Serialize;

use crate::session::PeerConnection;

/// Stable key for a client under test: the peer's host address, without the
/// ephemeral source port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClientIdentity(IpAddr);

impl ClientIdentity {
    pub fn from_peer_addr(peer_addr: SocketAddr) -> Self {
        Self::from_ip(peer_addr.ip())
    }

    /// IPv4-mapped IPv6 addresses collapse onto the plain IPv4 address so a
    /// dual-stack listener sees one client, not two.
    pub fn from_ip(ip: IpAddr) -> Self {
        let ip = match ip {
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => IpAddr::V4(v4),
                None => IpAddr::V6(v6),
            },
            IpAddr::V4(v4) => IpAddr::V4(v4),
        };
        Self(ip)
    }

    pub fn resolve<C: PeerConnection + ?Sized>(connection: &C) -> io::Result<Self> {
        connection.peer_addr().map(Self::from_peer_addr)
    }

    pub fn ip(&self) -> IpAddr {
        self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<IpAddr> for ClientIdentity {
    fn from(ip: IpAddr) -> Self {
        Self::from_ip(ip)
    }
}
