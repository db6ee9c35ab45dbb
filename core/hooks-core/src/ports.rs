//! OS-level port probing.
//!
//! The registry can disagree with reality after a crash, so the launcher asks
//! the OS directly whether a port can still be bound.

use std::net::{Ipv4Addr, SocketAddr, TcpListener};

pub trait PortProbe: Send + Sync {
    fn is_free(&self, host: &str, port: u16) -> bool;
}

/// Tries to bind the port and immediately releases it.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindProbe;

impl PortProbe for BindProbe {
    fn is_free(&self, host: &str, port: u16) -> bool {
        is_port_free(host, port)
    }
}

pub fn is_port_free(host: &str, port: u16) -> bool {
    let ip = host.parse().unwrap_or(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST));
    TcpListener::bind(SocketAddr::new(ip, port)).is_ok()
}
