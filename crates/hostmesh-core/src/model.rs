//! Data model shared by the consumer and provider halves of the protocol
//! (spec §3). Shapes are carried over from the Python original's
//! `model.py` `CoS`/`Request`/`Attempt` classes, not its code.

use std::collections::BTreeMap;
use std::time::{Instant, SystemTime};

use hostmesh_proto::ReqId;

use crate::transport::PeerAddr;

/// The quantities the reservation ledger actually accounts for. A `CoS`
/// carries many more QoS bounds (§3), but only these three feed `check`,
/// `reserve` and `free`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Requirements {
    pub cpu: u32,
    pub ram: f64,
    pub disk: f64,
}

impl Requirements {
    pub const ZERO: Requirements = Requirements {
        cpu: 0,
        ram: 0.0,
        disk: 0.0,
    };
}

/// Class of Service: identity plus a bundle of requirement bounds. Unset
/// bounds are permissive (+inf for max-X, 0 for min-X), matching spec §3.
/// Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct CoS {
    pub id: u32,
    pub name: String,
    pub max_response_time: Option<f64>,
    pub min_concurrent_users: u32,
    pub min_requests_per_second: f64,
    pub min_bandwidth: f64,
    pub max_delay: Option<f64>,
    pub max_jitter: Option<f64>,
    pub max_loss_rate: f64,
    pub min_cpu: u32,
    pub min_ram: f64,
    pub min_disk: f64,
}

impl CoS {
    pub fn requirements(&self) -> Requirements {
        Requirements {
            cpu: self.min_cpu,
            ram: self.min_ram,
            disk: self.min_disk,
        }
    }

    /// A permissive CoS with every bound at its unset (fully permissive) value.
    pub fn permissive(id: u32, name: impl Into<String>) -> Self {
        CoS {
            id,
            name: name.into(),
            max_response_time: None,
            min_concurrent_users: 0,
            min_requests_per_second: 0.0,
            min_bandwidth: 0.0,
            max_delay: None,
            max_jitter: None,
            max_loss_rate: 1.0,
            min_cpu: 0,
            min_ram: 0.0,
            min_disk: 0.0,
        }
    }
}

/// State of a consumer-side `Request` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqState {
    Hreq,
    Rreq,
    Dreq,
    Dres,
    Fail,
}

impl ReqState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReqState::Hreq => "HREQ",
            ReqState::Rreq => "RREQ",
            ReqState::Dreq => "DREQ",
            ReqState::Dres => "DRES",
            ReqState::Fail => "FAIL",
        }
    }
}

/// State of a single attempt through the HREQ→RREQ→DREQ chain (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Hreq,
    Rreq,
    Dreq,
    Dres,
    Rcan,
    Dcan,
}

impl AttemptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptState::Hreq => "HREQ",
            AttemptState::Rreq => "RREQ",
            AttemptState::Dreq => "DREQ",
            AttemptState::Dres => "DRES",
            AttemptState::Rcan => "RCAN",
            AttemptState::Dcan => "DCAN",
        }
    }
}

/// One pass through the HREQ→RREQ→DREQ chain for a request. A request may
/// have several; `Request` owns its `Attempt`s, which hold only `req_id`
/// back-reference (spec §9 "cyclic references").
#[derive(Debug, Clone)]
pub struct Attempt {
    pub req_id: ReqId,
    pub attempt_no: u32,
    pub host: Option<PeerAddr>,
    pub state: AttemptState,
    pub hreq_at: Option<Instant>,
    pub hres_at: Option<Instant>,
    pub rres_at: Option<Instant>,
    pub dres_at: Option<Instant>,
}

impl Attempt {
    pub fn new(req_id: ReqId, attempt_no: u32) -> Self {
        Attempt {
            req_id,
            attempt_no,
            host: None,
            state: AttemptState::Hreq,
            hreq_at: None,
            hres_at: None,
            rres_at: None,
            dres_at: None,
        }
    }
}

/// A consumer-side request: one call to `send_request` (spec §3).
#[derive(Debug, Clone)]
pub struct Request {
    pub id: ReqId,
    pub cos: CoS,
    pub data: Vec<u8>,
    pub result: Option<Vec<u8>>,
    pub host: Option<PeerAddr>,
    pub state: ReqState,
    pub hreq_at: Option<Instant>,
    pub dres_at: Option<Instant>,
    /// We gave up waiting on this attempt but will still accept a late result.
    pub late: bool,
    pub attempts: BTreeMap<u32, Attempt>,
}

impl Request {
    pub fn new(id: ReqId, cos: CoS, data: Vec<u8>) -> Self {
        Request {
            id,
            cos,
            data,
            result: None,
            host: None,
            state: ReqState::Hreq,
            hreq_at: None,
            dres_at: None,
            late: false,
            attempts: BTreeMap::new(),
        }
    }

    /// The attempt currently in a non-terminal state, if any (invariant 2,
    /// spec §3: "Exactly one attempt is ever in a non-terminal state").
    pub fn current_attempt_mut(&mut self) -> Option<&mut Attempt> {
        self.attempts
            .values_mut()
            .rev()
            .find(|a| !matches!(a.state, AttemptState::Rcan | AttemptState::Dcan))
    }
}

/// An observation logged by the consumer for each HRES it receives
/// (spec §3).
#[derive(Debug, Clone, Copy)]
pub struct Response {
    pub req_id: ReqId,
    pub attempt_no: u32,
    pub host: PeerAddr,
    pub cpu: u32,
    pub ram: f64,
    pub disk: f64,
    pub timestamp: SystemTime,
}

/// State of a provider-side request, extended with `Hres` relative to the
/// consumer-side `ReqState` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Hreq,
    Hres,
    Rres,
    Dres,
}
