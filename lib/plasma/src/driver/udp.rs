use crate::protocol::uri::ChannelUri;
use mio::net::UdpSocket;
use mio::{Interest, Registry, Token};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// A non-blocking UDP socket for one channel endpoint. Publications use a
/// connected-style transport aimed at the destination; subscriptions bind
/// the destination locally (joining the group for multicast) and learn peer
/// addresses from datagram sources.
pub struct UdpTransport {
    socket: UdpSocket,
    endpoint: SocketAddr,
    multicast: bool,
}

impl UdpTransport {
    /// Transport for the sending side of a channel: bound ephemerally, data
    /// goes to the endpoint, status messages and NAKs come back from
    /// receivers.
    pub fn publisher(channel: &ChannelUri) -> io::Result<UdpTransport> {
        let endpoint = channel.endpoint();
        let bind_addr: SocketAddr = match endpoint {
            SocketAddr::V4(_) => "0.0.0.0:0".parse().expect("Malformed wildcard address"),
            SocketAddr::V6(_) => "[::]:0".parse().expect("Malformed wildcard address"),
        };

        let socket = std::net::UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;

        if channel.is_multicast() {
            socket.set_multicast_ttl_v4(8)?;
            socket.set_multicast_loop_v4(true)?;
        }

        Ok(UdpTransport {
            socket: UdpSocket::from_std(socket),
            endpoint,
            multicast: channel.is_multicast(),
        })
    }

    /// Transport for the receiving side of a channel: bound at the endpoint,
    /// joined to the group when multicast.
    pub fn subscriber(channel: &ChannelUri, default_interface: Option<Ipv4Addr>) -> io::Result<UdpTransport> {
        let endpoint = channel.endpoint();

        let socket = if channel.is_multicast() {
            let bind_addr = SocketAddr::new(
                match endpoint {
                    SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    SocketAddr::V6(addr) => IpAddr::V6(*addr.ip()),
                },
                endpoint.port(),
            );
            let socket = std::net::UdpSocket::bind(bind_addr)?;

            if let (IpAddr::V4(group), interface) = (endpoint.ip(), channel.interface()) {
                let interface = match interface {
                    Some(IpAddr::V4(addr)) => addr,
                    _ => default_interface.unwrap_or(Ipv4Addr::UNSPECIFIED),
                };
                socket.join_multicast_v4(&group, &interface)?;
            }
            socket
        } else {
            std::net::UdpSocket::bind(endpoint)?
        };

        socket.set_nonblocking(true)?;

        Ok(UdpTransport {
            socket: UdpSocket::from_std(socket),
            endpoint,
            multicast: channel.is_multicast(),
        })
    }

    #[inline]
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    #[inline]
    pub fn is_multicast(&self) -> bool {
        self.multicast
    }

    /// Local address, which receivers see as the datagram source.
    #[inline]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        registry.register(&mut self.socket, token, Interest::READABLE)
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.socket)
    }

    /// Sends to the channel endpoint. Returns the bytes sent; zero means the
    /// socket would have blocked (a short send, counted by the caller).
    pub fn send(&self, data: &[u8]) -> io::Result<usize> {
        match self.socket.send_to(data, self.endpoint) {
            Ok(sent) => Ok(sent),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(err) => Err(err),
        }
    }

    /// Sends a control frame to a specific peer.
    pub fn send_to(&self, data: &[u8], to: SocketAddr) -> io::Result<usize> {
        match self.socket.send_to(data, to) {
            Ok(sent) => Ok(sent),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(err) => Err(err),
        }
    }

    /// Receives one datagram if available.
    pub fn recv(&self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buffer) {
            Ok((length, from)) => Ok(Some((length, from))),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }
}
