//! Host interface address detection

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};

/// Source of the address the host would pick for outbound traffic
pub trait HostInterface: Send + Sync {
    /// Address of the interface carrying the default route
    fn default_address(&self, ipv6: bool) -> io::Result<IpAddr>;
}

/// Detects the default-route address by connecting an unbound UDP socket
///
/// Connecting a datagram socket sends nothing; it only asks the kernel to
/// pick a route, after which the local address is the one the kubelet would
/// auto-select.
#[derive(Debug, Clone)]
pub struct DefaultRouteInterface {
    probe_v4: SocketAddr,
    probe_v6: SocketAddr,
}

impl Default for DefaultRouteInterface {
    fn default() -> Self {
        Self {
            probe_v4: SocketAddr::from(([8, 8, 8, 8], 53)),
            probe_v6: SocketAddr::from(([0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888], 53)),
        }
    }
}

impl HostInterface for DefaultRouteInterface {
    fn default_address(&self, ipv6: bool) -> io::Result<IpAddr> {
        let (bind, probe) = if ipv6 {
            ("[::]:0", self.probe_v6)
        } else {
            ("0.0.0.0:0", self.probe_v4)
        };

        let socket = UdpSocket::bind(bind)?;
        socket.connect(probe)?;
        let addr = socket.local_addr()?.ip();

        if addr.is_unspecified() {
            return Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "no default route",
            ));
        }
        Ok(addr)
    }
}
