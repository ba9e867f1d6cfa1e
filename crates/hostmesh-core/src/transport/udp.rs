//! Real transport over UDP broadcast/unicast sockets (spec §6).

use std::net::{Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use hostmesh_proto::{decode, encode, Packet};

use super::{Error, Inbound, PeerAddr, Transport};

const MAX_DATAGRAM: usize = 65_507;

pub struct UdpTransport {
    socket: UdpSocket,
    local_addrs: Vec<PeerAddr>,
    broadcast_addr: PeerAddr,
}

impl UdpTransport {
    /// Bind a UDP socket on `bind_addr` with `SO_BROADCAST` set, so HREQ can
    /// be sent to the IPv4 limited broadcast address (spec §6: "Broadcast
    /// destination address used for HREQ; unicast for all others").
    pub fn bind(bind_addr: SocketAddr, port: u16) -> Result<Self, Error> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.bind(&bind_addr.into())?;
        socket.set_nonblocking(true)?;

        let socket = UdpSocket::from_std(socket.into())?;
        let local_addrs = vec![socket.local_addr()?];
        let broadcast_addr = SocketAddr::new(Ipv4Addr::BROADCAST.into(), port);

        Ok(UdpTransport {
            socket,
            local_addrs,
            broadcast_addr,
        })
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn broadcast(&self, packet: &Packet) -> Result<(), Error> {
        let bytes = encode(packet);
        self.socket.send_to(&bytes, self.broadcast_addr).await?;
        Ok(())
    }

    async fn unicast(&self, to: PeerAddr, packet: &Packet) -> Result<(), Error> {
        let bytes = encode(packet);
        self.socket.send_to(&bytes, to).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Inbound, Error> {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let (n, from) = self.socket.recv_from(&mut buf).await?;
            match decode(&buf[..n]) {
                Ok(packet) => return Ok(Inbound { from, packet }),
                Err(err) => {
                    tracing::debug!(?from, %err, "dropping malformed packet");
                    continue;
                }
            }
        }
    }

    fn local_addrs(&self) -> Vec<PeerAddr> {
        self.local_addrs.clone()
    }
}
