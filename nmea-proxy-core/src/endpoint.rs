//! Network endpoint descriptor shared by clients and servers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// An IPv4 host and port, with an optional human readable name used in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub name: Option<String>,
}

impl Endpoint {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Endpoint {
            ip,
            port,
            name: None,
        }
    }

    pub fn named(ip: Ipv4Addr, port: u16, name: impl Into<String>) -> Self {
        Endpoint {
            ip,
            port,
            name: Some(name.into()),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({}:{})", name, self.ip, self.port),
            None => write!(f, "{}:{}", self.ip, self.port),
        }
    }
}
