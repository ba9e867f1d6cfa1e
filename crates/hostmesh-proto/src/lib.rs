//! Wire packet and codec for the hostmesh protocol (spec §4.1).

mod codec;
mod packet;
mod reqid;

pub use codec::{decode, encode};
pub use packet::{Packet, State};
pub use reqid::{ReqId, REQ_ID_LEN};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed packet: need at least {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error("malformed packet: unknown state tag {0}")]
    UnknownState(u8),
}
