use axum::{extract::ConnectInfo, http::HeaderMap};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// The resolved address of the caller, inserted by `ip_guard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

impl ClientIp {
    pub const UNKNOWN: ClientIp = ClientIp(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
}

/// Proxy headers are only honored when `trust_proxy` is set; otherwise any
/// client could pick its own identity for rate limiting and blocking.
pub fn resolve_client_ip(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trust_proxy: bool,
) -> ClientIp {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ClientIp(ip);
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok());
        if let Some(ip) = real_ip {
            return ClientIp(ip);
        }
    }

    connect_info
        .map(|ConnectInfo(addr)| ClientIp(addr.ip()))
        .unwrap_or(ClientIp::UNKNOWN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn proxy_headers_need_trust() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        let socket = ConnectInfo("192.0.2.1:5000".parse::<SocketAddr>().unwrap());

        assert_eq!(resolve_client_ip(&headers, Some(&socket), true).0.to_string(), "203.0.113.9");
        assert_eq!(resolve_client_ip(&headers, Some(&socket), false).0.to_string(), "192.0.2.1");
    }

    #[test]
    fn falls_back_to_real_ip_then_unknown() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("garbage"));
        headers.insert("x-real-ip", HeaderValue::from_static("2001:db8::7"));
        assert_eq!(resolve_client_ip(&headers, None, true).0.to_string(), "2001:db8::7");
        assert_eq!(resolve_client_ip(&HeaderMap::new(), None, true), ClientIp::UNKNOWN);
    }
}
