//! The link between the protocol FSMs and the network (spec §6). No example
//! repo in the corpus carries a raw-Ethernet-frame crate, and the spec's own
//! Non-goals exclude authenticated/encrypted transport and multi-hop
//! routing, so broadcast/unicast UDP datagrams stand in for the raw frames
//! of spec §4.1/§6 without changing any of the core's observable behavior.

use std::net::SocketAddr;
use std::sync::Arc;

use hostmesh_proto::Packet;

/// A peer is identified by its socket address on the shared segment.
pub type PeerAddr = SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
}

/// An inbound datagram together with the address it was received from.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub from: PeerAddr,
    pub packet: Packet,
}

/// The network seam the core protocol runs over. `broadcast` is used only
/// for HREQ; every other packet goes over `unicast` (spec §6).
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn broadcast(&self, packet: &Packet) -> Result<(), Error>;
    async fn unicast(&self, to: PeerAddr, packet: &Packet) -> Result<(), Error>;
    /// Receive the next inbound datagram. The transport MUST NOT filter
    /// broadcast replies by destination address (spec §4.1); source
    /// filtering and self-echo suppression are the Answering Machine's job.
    async fn recv(&self) -> Result<Inbound, Error>;
    /// The local addresses this node owns, used by the Answering Machine to
    /// drop self-originated packets (spec §4.2, §8 scenario 6).
    fn local_addrs(&self) -> Vec<PeerAddr>;
}

pub type SharedTransport = Arc<dyn Transport>;

pub mod sim;
pub mod udp;

pub use sim::SimTransport;
pub use udp::UdpTransport;
