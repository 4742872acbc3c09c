use serde::{Deserialize, Serialize};

use super::error::{ResumerError, ResumerResult};

/// A node's advertised `host:port`.
///
/// Host comparison is case-insensitive; ports compare exactly. Port 0
/// means "this node cannot be redirected to".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`, `[v6::addr]:port`, or a bare host (port 0).
    /// IPv6 brackets and zone suffixes are stripped from the host.
    pub fn parse(input: &str) -> ResumerResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ResumerError::InvalidAddress("empty address".to_string()));
        }

        let (host_part, port_part) = if let Some(rest) = input.strip_prefix('[') {
            // Bracketed IPv6: [fe80::1%eth0]:9090
            let (host, rest) = rest
                .split_once(']')
                .ok_or_else(|| ResumerError::InvalidAddress(format!("unclosed '[' in {input}")))?;
            let port = match rest.strip_prefix(':') {
                Some(port) => Some(port),
                None if rest.is_empty() => None,
                None => {
                    return Err(ResumerError::InvalidAddress(format!(
                        "unexpected trailing {rest:?} in {input}"
                    )));
                }
            };
            (host, port)
        } else if input.matches(':').count() > 1 {
            // Unbracketed IPv6 literal carries no port.
            (input, None)
        } else {
            match input.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (input, None),
            }
        };

        // Zone index is local to the owning node; never compare on it.
        let host = host_part.split('%').next().unwrap_or(host_part);
        if host.is_empty() {
            return Err(ResumerError::InvalidAddress(format!(
                "missing host in {input}"
            )));
        }

        let port = match port_part {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| ResumerError::InvalidAddress(format!("invalid port in {input}")))?,
            None => 0,
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// This node's fallback identity: `hostname:0` (not redirectable).
    pub fn local_fallback() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self { host, port: 0 }
    }

    /// Whether other nodes can meaningfully redirect callers here.
    pub fn is_redirectable(&self) -> bool {
        self.port != 0
    }

    /// Case-insensitive host, exact port.
    pub fn matches(&self, other: &NodeAddress) -> bool {
        self.port == other.port && self.host.eq_ignore_ascii_case(&other.host)
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let addr = NodeAddress::parse("node-a.internal:9090").unwrap();
        assert_eq!(addr.host, "node-a.internal");
        assert_eq!(addr.port, 9090);
        assert!(addr.is_redirectable());
    }

    #[test]
    fn test_parse_bare_host_gets_port_zero() {
        let addr = NodeAddress::parse("node-a").unwrap();
        assert_eq!(addr.port, 0);
        assert!(!addr.is_redirectable());
    }

    #[test]
    fn test_parse_bracketed_ipv6() {
        let addr = NodeAddress::parse("[fe80::1%eth0]:9090").unwrap();
        assert_eq!(addr.host, "fe80::1");
        assert_eq!(addr.port, 9090);
    }

    #[test]
    fn test_parse_unbracketed_ipv6_has_no_port() {
        let addr = NodeAddress::parse("fe80::1").unwrap();
        assert_eq!(addr.host, "fe80::1");
        assert_eq!(addr.port, 0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(NodeAddress::parse("").is_err());
        assert!(NodeAddress::parse("host:notaport").is_err());
        assert!(NodeAddress::parse("[fe80::1:9090").is_err());
    }

    #[test]
    fn test_matches_is_host_case_insensitive() {
        let a = NodeAddress::new("Node-A", 9090);
        let b = NodeAddress::new("node-a", 9090);
        let c = NodeAddress::new("node-a", 9091);
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }

    #[test]
    fn test_display_rebrackets_ipv6() {
        let addr = NodeAddress::new("fe80::1", 9090);
        assert_eq!(addr.to_string(), "[fe80::1]:9090");
        assert_eq!(NodeAddress::parse(&addr.to_string()).unwrap(), addr);
    }
}
