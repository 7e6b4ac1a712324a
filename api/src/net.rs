use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::PortOffset;

/// Path of the discovery endpoint
pub const HELLO_PATH: &str = "/hello";

/// Port every launcher listens on unless told otherwise
pub const DEFAULT_LAUNCHER_PORT: u16 = 4000;

/// Canonical name of all loopback forms
pub const LOCALHOST: &str = "localhost";

/// Wire form of [`crate::PeerDirectory`]
///
/// The directory travels column-wise: the `n`-th element of every list
/// describes the `n`-th peer.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct DirectorySnapshot {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub port_offsets: Vec<PortOffset>,
    #[serde(default)]
    pub directories: Vec<String>,
    #[serde(default)]
    pub my_index: usize,
    #[serde(default)]
    pub agency_size: usize,
}

/// Body of a join request (`POST /hello`)
///
/// Only the directory is taken from the request, the host is always
/// the observed origin of the connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct JoinRequest {
    #[serde(default)]
    pub directories: Vec<String>,
}

impl JoinRequest {
    pub fn new(directory: impl Into<String>) -> Self {
        Self {
            directories: vec![directory.into()],
        }
    }

    pub fn directory(&self) -> Option<&str> {
        self.directories.first().map(String::as_str)
    }
}

/// Body of every non-success response
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

/// Host identifying a peer that connected from `addr`
pub fn host_from_socket_addr(addr: &SocketAddr) -> String {
    let ip = match addr.ip() {
        IpAddr::V6(ip) => ip
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(ip)),
        ip => ip,
    };

    if ip.is_loopback() {
        return LOCALHOST.to_owned();
    }
    match ip {
        IpAddr::V4(ip) => ip.to_string(),
        IpAddr::V6(ip) => format!("[{ip}]"),
    }
}

/// Host part of an HTTP authority (`Host` header), loopback normalized
pub fn host_from_authority(authority: &str) -> String {
    let (host, _) = split_host_port(authority);
    normalize_host(host)
}

pub fn normalize_host(host: &str) -> String {
    match host {
        "127.0.0.1" | "[::1]" | "::1" => LOCALHOST.to_owned(),
        host => host.to_owned(),
    }
}

/// Split `host[:port]`
///
/// IPv6 hosts have to be bracketed to carry a port. A port that doesn't
/// parse is treated as missing.
pub fn split_host_port(addr: &str) -> (&str, Option<u16>) {
    let port_sep = if addr.starts_with('[') {
        addr.find(']').and_then(|end| {
            addr[end + 1..]
                .starts_with(':')
                .then_some(end + 1)
        })
    } else {
        addr.rfind(':')
            .filter(|pos| 0 < *pos && addr.matches(':').count() == 1)
    };

    match port_sep {
        Some(pos) => (&addr[..pos], addr[pos + 1..].parse().ok()),
        None => (addr, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn loopback_forms_collapse() {
        for addr in ["127.0.0.1:1234", "[::1]:1234", "[::ffff:127.0.0.1]:1234"] {
            assert_eq!(
                host_from_socket_addr(&SocketAddr::from_str(addr).unwrap()),
                LOCALHOST
            );
        }
        for authority in ["127.0.0.1:4000", "[::1]:4000", "localhost:4000", "[::1]"] {
            assert_eq!(host_from_authority(authority), LOCALHOST);
        }
    }

    #[test]
    fn remote_hosts_keep_their_address() {
        assert_eq!(
            host_from_socket_addr(&SocketAddr::from_str("10.1.2.3:5555").unwrap()),
            "10.1.2.3"
        );
        assert_eq!(
            host_from_socket_addr(&SocketAddr::from_str("[fd00::7]:5555").unwrap()),
            "[fd00::7]"
        );
        assert_eq!(host_from_authority("db1.example.com:4000"), "db1.example.com");
    }

    #[test]
    fn split_host_port_cases() {
        assert_eq!(split_host_port("db1:4005"), ("db1", Some(4005)));
        assert_eq!(split_host_port("db1"), ("db1", None));
        assert_eq!(split_host_port("[fd00::7]:4005"), ("[fd00::7]", Some(4005)));
        assert_eq!(split_host_port("[fd00::7]"), ("[fd00::7]", None));
        assert_eq!(split_host_port("db1:http"), ("db1", None));
    }

    #[test]
    fn join_request_wire_format() {
        let req: JoinRequest =
            serde_json::from_str(r#"{"Directories": ["/var/lib/starter/"]}"#).unwrap();
        assert_eq!(req.directory(), Some("/var/lib/starter/"));

        let empty: JoinRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.directory(), None);
    }
}
