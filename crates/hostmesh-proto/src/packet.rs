use crate::ReqId;

/// The one-byte packet state tag, fixed by the wire format (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Fail = 0,
    Hreq = 1,
    Hres = 2,
    Rreq = 3,
    Rres = 4,
    Rcan = 5,
    Dreq = 6,
    Dres = 7,
    Dack = 8,
    Dcan = 9,
    Dwait = 10,
}

impl TryFrom<u8> for State {
    type Error = crate::Error;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0 => State::Fail,
            1 => State::Hreq,
            2 => State::Hres,
            3 => State::Rreq,
            4 => State::Rres,
            5 => State::Rcan,
            6 => State::Dreq,
            7 => State::Dres,
            8 => State::Dack,
            9 => State::Dcan,
            10 => State::Dwait,
            other => return Err(crate::Error::UnknownState(other)),
        })
    }
}

/// One protocol packet. A tagged variant with a per-state field set, rather
/// than one struct with a long run of `ConditionalField`s — the dynamic
/// dispatch this replaces is named directly in the spec's design notes.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Hreq {
        req_id: ReqId,
        attempt_no: u32,
        cos_id: u32,
    },
    Hres {
        req_id: ReqId,
        attempt_no: u32,
        cpu_offer: u32,
        ram_offer: f64,
        disk_offer: f64,
    },
    Rreq {
        req_id: ReqId,
    },
    Rres {
        req_id: ReqId,
    },
    Rcan {
        req_id: ReqId,
    },
    Dreq {
        req_id: ReqId,
        attempt_no: u32,
        data: Vec<u8>,
    },
    Dres {
        req_id: ReqId,
        attempt_no: u32,
        data: Vec<u8>,
    },
    Dack {
        req_id: ReqId,
    },
    Dcan {
        req_id: ReqId,
    },
    Dwait {
        req_id: ReqId,
    },
}

impl Packet {
    pub fn state(&self) -> State {
        match self {
            Packet::Hreq { .. } => State::Hreq,
            Packet::Hres { .. } => State::Hres,
            Packet::Rreq { .. } => State::Rreq,
            Packet::Rres { .. } => State::Rres,
            Packet::Rcan { .. } => State::Rcan,
            Packet::Dreq { .. } => State::Dreq,
            Packet::Dres { .. } => State::Dres,
            Packet::Dack { .. } => State::Dack,
            Packet::Dcan { .. } => State::Dcan,
            Packet::Dwait { .. } => State::Dwait,
        }
    }

    pub fn req_id(&self) -> ReqId {
        match self {
            Packet::Hreq { req_id, .. }
            | Packet::Hres { req_id, .. }
            | Packet::Rreq { req_id, .. }
            | Packet::Rres { req_id, .. }
            | Packet::Rcan { req_id, .. }
            | Packet::Dreq { req_id, .. }
            | Packet::Dres { req_id, .. }
            | Packet::Dack { req_id, .. }
            | Packet::Dcan { req_id, .. }
            | Packet::Dwait { req_id, .. } => *req_id,
        }
    }

    /// attempt_no, for the variants that carry one.
    pub fn attempt_no(&self) -> Option<u32> {
        match self {
            Packet::Hreq { attempt_no, .. }
            | Packet::Hres { attempt_no, .. }
            | Packet::Dreq { attempt_no, .. }
            | Packet::Dres { attempt_no, .. } => Some(*attempt_no),
            _ => None,
        }
    }

    /// Whether `self`, sent in reply, answers a packet in state `other`,
    /// per the expected-reply table in spec §4.1.
    pub fn answers(&self, other: State) -> bool {
        matches!(
            (other, self.state()),
            (State::Hreq, State::Hres)
                | (State::Rreq, State::Rres)
                | (State::Rreq, State::Rcan)
                | (State::Rres, State::Dreq)
                | (State::Rres, State::Rcan)
                | (State::Dreq, State::Dres)
                | (State::Dreq, State::Dwait)
                | (State::Dreq, State::Dcan)
                | (State::Dres, State::Dack)
                | (State::Dres, State::Dcan)
        )
    }
}
