//! Facts about the local host

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Best guess at the address other hosts reach us on
///
/// Connecting a UDP socket sends nothing; it only makes the kernel pick the
/// outgoing interface. Falls back to loopback on isolated machines.
pub fn local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1))?;
        Ok(socket.local_addr()?.ip())
    };

    match probe() {
        Ok(ip) if !ip.is_unspecified() => ip,
        _ => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}

/// Full host name
pub fn hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

/// Host name up to the first dot
pub fn short_hostname() -> String {
    let name = hostname();
    match name.split_once('.') {
        Some((short, _)) => short.to_string(),
        None => name,
    }
}

/// Name of the user running this process
pub fn user_name() -> String {
    whoami::username()
}

/// `uname`-style description of the system
pub fn uname() -> Vec<String> {
    vec![
        std::env::consts::OS.to_string(),
        hostname(),
        whoami::distro(),
        std::env::consts::ARCH.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_hostname_has_no_dot() {
        assert!(!short_hostname().contains('.'));
    }

    #[test]
    fn test_local_ip_is_specified() {
        assert!(!local_ip().is_unspecified());
    }
}
