//! Client identity extraction from request metadata.

use crate::error::IdentityError;
use http::Request;
use std::net::{IpAddr, SocketAddr};

/// Derives the rate-limit key for a request.
pub trait IdentityExtractor<B>: Send + Sync {
    fn extract(&self, req: &Request<B>) -> Result<String, IdentityError>;
}

impl<B, F> IdentityExtractor<B> for F
where
    F: Fn(&Request<B>) -> Result<String, IdentityError> + Send + Sync,
{
    fn extract(&self, req: &Request<B>) -> Result<String, IdentityError> {
        self(req)
    }
}

/// Raw `host:port` string a transport attaches when it has no parsed
/// [`SocketAddr`] to offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddr(pub String);

/// Keys requests by the peer's IP address, port stripped.
///
/// Reads a [`SocketAddr`] request extension, falling back to [`RemoteAddr`].
/// IPv4-mapped IPv6 peers are keyed by their IPv4 form so both socket families
/// share one bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerIp;

impl<B> IdentityExtractor<B> for PeerIp {
    fn extract(&self, req: &Request<B>) -> Result<String, IdentityError> {
        if let Some(addr) = req.extensions().get::<SocketAddr>() {
            return Ok(normalize(addr.ip()).to_string());
        }
        let raw = req.extensions().get::<RemoteAddr>().ok_or(IdentityError::MissingPeerAddr)?;
        let host = split_host_port(&raw.0)?;
        Ok(match host.parse::<IpAddr>() {
            Ok(ip) => normalize(ip).to_string(),
            Err(_) => host.to_owned(),
        })
    }
}

fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(IpAddr::V6(v6), IpAddr::V4),
        v4 => v4,
    }
}

/// Split `host:port` or `[host]:port` and return the host.
///
/// Unbracketed hosts containing a colon are rejected, as is a missing or empty
/// port.
pub fn split_host_port(addr: &str) -> Result<&str, IdentityError> {
    let invalid = || IdentityError::InvalidRemoteAddr { addr: addr.to_owned() };

    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
        let port = after.strip_prefix(':').ok_or_else(invalid)?;
        (host, port)
    } else {
        let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
        if host.contains(':') {
            return Err(invalid());
        }
        (host, port)
    };

    if port.is_empty() || host.contains('[') || host.contains(']') {
        return Err(invalid());
    }
    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request<()> {
        Request::builder().uri("/").body(()).unwrap()
    }

    #[test]
    fn splits_ipv4_and_bracketed_ipv6() {
        assert_eq!(split_host_port("192.168.1.7:8080").unwrap(), "192.168.1.7");
        assert_eq!(split_host_port("[::1]:443").unwrap(), "::1");
        assert_eq!(split_host_port("localhost:80").unwrap(), "localhost");
        assert_eq!(split_host_port(":80").unwrap(), "");
    }

    #[test]
    fn rejects_malformed_remote_addrs() {
        for bad in ["192.168.1.7", "::1:443", "[::1]443", "[::1", "10.0.0.1:", "[a]b]:1"] {
            assert_eq!(
                split_host_port(bad),
                Err(IdentityError::InvalidRemoteAddr { addr: bad.to_string() }),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn peer_ip_strips_port() {
        let mut req = request();
        req.extensions_mut().insert(SocketAddr::from(([10, 1, 2, 3], 55000)));
        assert_eq!(PeerIp.extract(&req).unwrap(), "10.1.2.3");
    }

    #[test]
    fn peer_ip_maps_ipv4_in_ipv6() {
        let mut req = request();
        let addr: SocketAddr = "[::ffff:10.1.2.3]:9000".parse().unwrap();
        req.extensions_mut().insert(addr);
        assert_eq!(PeerIp.extract(&req).unwrap(), "10.1.2.3");
    }

    #[test]
    fn peer_ip_falls_back_to_remote_addr() {
        let mut req = request();
        req.extensions_mut().insert(RemoteAddr("[2001:db8::1]:1234".into()));
        assert_eq!(PeerIp.extract(&req).unwrap(), "2001:db8::1");

        let mut req = request();
        req.extensions_mut().insert(RemoteAddr("garbage".into()));
        assert!(matches!(PeerIp.extract(&req), Err(IdentityError::InvalidRemoteAddr { .. })));
    }

    #[test]
    fn peer_ip_requires_some_address() {
        assert_eq!(PeerIp.extract(&request()), Err(IdentityError::MissingPeerAddr));
    }

    #[test]
    fn closures_are_extractors() {
        let by_header = |req: &Request<()>| {
            req.headers()
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
                .ok_or(IdentityError::MissingPeerAddr)
        };
        let req = Request::builder().header("x-api-key", "k1").body(()).unwrap();
        assert_eq!(by_header.extract(&req).unwrap(), "k1");
    }
}
