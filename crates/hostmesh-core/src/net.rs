//! Resolves this node's outbound-interface IPv4 address, the way the
//! Python original's `monitor.py` derives `MY_IP` — connect a UDP socket to
//! an arbitrary public address (nothing is actually sent) and read back the
//! local address the OS picked for that route. Used only to name simulation
//! CSV exports after the node that produced them (spec §6).

use std::net::{IpAddr, UdpSocket};

pub fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}
