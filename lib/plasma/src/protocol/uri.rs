use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

pub type UriResult<T> = Result<T, UriError>;

#[derive(Debug, Eq, PartialEq)]
pub enum UriError {
    /// Only the `udp` scheme is supported.
    UnsupportedScheme,
    /// The endpoint part did not resolve to an address.
    BadEndpoint,
    /// The interface selector before `@` did not parse as an address.
    BadInterface,
}

/// A parsed channel destination: `udp://[interface@]host:port`. The group
/// address decides unicast versus multicast mode, which in turn selects the
/// flow control strategy and socket setup for the channel.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChannelUri {
    uri: String,
    endpoint: SocketAddr,
    interface: Option<IpAddr>,
}

impl ChannelUri {
    pub fn parse(uri: &str) -> UriResult<ChannelUri> {
        let rest = uri.strip_prefix("udp://").ok_or(UriError::UnsupportedScheme)?;

        let (interface, endpoint_part) = match rest.split_once('@') {
            Some((iface, endpoint)) => {
                let addr = iface.parse::<IpAddr>().map_err(|_| UriError::BadInterface)?;
                (Some(addr), endpoint)
            }
            None => (None, rest),
        };

        let endpoint = endpoint_part
            .to_socket_addrs()
            .map_err(|_| UriError::BadEndpoint)?
            .next()
            .ok_or(UriError::BadEndpoint)?;

        Ok(ChannelUri {
            uri: uri.to_string(),
            endpoint,
            interface,
        })
    }

    #[inline]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[inline]
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    #[inline]
    pub fn interface(&self) -> Option<IpAddr> {
        self.interface
    }

    #[inline]
    pub fn is_multicast(&self) -> bool {
        self.endpoint.ip().is_multicast()
    }

    /// Directory-safe rendering used for the shared-memory file layout.
    pub fn canonical(&self) -> String {
        self.uri
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unicast() {
        let channel = ChannelUri::parse("udp://127.0.0.1:40123").unwrap();

        assert_eq!(channel.endpoint(), "127.0.0.1:40123".parse().unwrap());
        assert_eq!(channel.interface(), None);
        assert!(!channel.is_multicast());
    }

    #[test]
    fn test_parse_multicast_with_interface() {
        let channel = ChannelUri::parse("udp://127.0.0.1@224.0.1.1:40456").unwrap();

        assert_eq!(channel.endpoint(), "224.0.1.1:40456".parse().unwrap());
        assert_eq!(channel.interface(), Some("127.0.0.1".parse().unwrap()));
        assert!(channel.is_multicast());
    }

    #[test]
    fn test_parse_resolves_hostnames() {
        let channel = ChannelUri::parse("udp://localhost:40123").unwrap();
        assert_eq!(channel.endpoint().port(), 40123);
    }

    #[test]
    fn test_parse_err_scheme() {
        assert_eq!(
            ChannelUri::parse("tcp://127.0.0.1:40123").unwrap_err(),
            UriError::UnsupportedScheme
        );
    }

    #[test]
    fn test_parse_err_endpoint() {
        assert_eq!(
            ChannelUri::parse("udp://not an endpoint").unwrap_err(),
            UriError::BadEndpoint
        );
    }

    #[test]
    fn test_parse_err_interface() {
        assert_eq!(
            ChannelUri::parse("udp://bogus@224.0.1.1:40456").unwrap_err(),
            UriError::BadInterface
        );
    }

    #[test]
    fn test_canonical_is_directory_safe() {
        let channel = ChannelUri::parse("udp://127.0.0.1:40123").unwrap();
        assert_eq!(channel.canonical(), "udp___127_0_0_1_40123");
    }
}
