//! The Request Registry (spec §4.6): in-memory tables of live consumer-side
//! requests, provider-side requests, and observed responses. Registry-level
//! maps use a plain `std::sync::Mutex` held only for the map lookup/insert;
//! per-request mutation happens through the `tokio::sync::Mutex` on each
//! entry, which may be held across the `.await` of a network round-trip.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex as AsyncMutex};

use hostmesh_proto::ReqId;

use crate::model::{ProviderState, Request, Response};
use crate::transport::{Inbound, PeerAddr};
use crate::CoS;

pub type Shared<T> = Arc<AsyncMutex<T>>;

struct ConsumerEntry {
    request: Shared<Request>,
    /// The Answering Machine forwards every inbound packet matching this
    /// request's `req_id` here; the consumer FSM's phase loops drain it
    /// (spec §4.2/§4.3's "packet-sniffing").
    waiter: mpsc::UnboundedSender<Inbound>,
}

/// In-memory, mutex-guarded map of live consumer-side requests, keyed by
/// `req_id`. Pre-seeded with any `req_id` already present in persistence so
/// fresh ids never collide with one already recorded (spec invariant 1).
#[derive(Default)]
pub struct ConsumerRegistry {
    inner: StdMutex<HashMap<ReqId, ConsumerEntry>>,
    seen_ids: StdMutex<HashSet<ReqId>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_known_id(&self, id: ReqId) {
        // A placeholder entry would be wrong (it has no real Request), so
        // seeding only needs to prevent `ReqId::generate()` collisions,
        // which callers do by consulting `contains` before accepting a
        // freshly generated id. We track seen ids in a side set instead of
        // inserting a fake Request.
        let mut seen = self.seen_ids.lock().expect("registry mutex poisoned");
        seen.insert(id);
    }

    /// Registers a live request and returns the shared handle plus the
    /// receiving half of its sniff channel.
    pub fn insert(&self, request: Request) -> (Shared<Request>, mpsc::UnboundedReceiver<Inbound>) {
        let id = request.id;
        let shared = Arc::new(AsyncMutex::new(request));
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        inner.insert(
            id,
            ConsumerEntry {
                request: shared.clone(),
                waiter: tx,
            },
        );
        (shared, rx)
    }

    pub fn get(&self, id: &ReqId) -> Option<Shared<Request>> {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        inner.get(id).map(|e| e.request.clone())
    }

    /// Forwards `inbound` to the request's sniff channel, if it is still
    /// registered. Returns whether a live entry was found.
    pub fn deliver(&self, id: &ReqId, inbound: Inbound) -> bool {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        match inner.get(id) {
            Some(entry) => {
                let _ = entry.waiter.send(inbound);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &ReqId) -> Option<Shared<Request>> {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        inner.remove(id).map(|e| e.request)
    }

    /// A fresh id, guaranteed distinct from every live or previously-seen
    /// persisted id (spec invariant 1).
    pub fn fresh_id(&self) -> ReqId {
        loop {
            let candidate = ReqId::generate();
            let mut seen = self.seen_ids.lock().expect("registry mutex poisoned");
            let inner = self.inner.lock().expect("registry mutex poisoned");
            if !seen.contains(&candidate) && !inner.contains_key(&candidate) {
                seen.insert(candidate);
                return candidate;
            }
        }
    }
}

/// Key for a provider-side request: `(peer_address, req_id)` (spec §3).
pub type ProviderKey = (PeerAddr, ReqId);

/// A provider-side request entry. Owns its own short-lived mutex so the
/// dispatcher's synchronous handling and background responder tasks can
/// each briefly lock it around a state transition without ever holding the
/// lock across a network `.await` (spec §5).
pub struct ProviderEntry {
    pub peer: PeerAddr,
    pub req_id: ReqId,
    pub state: AsyncMutex<ProviderEntryState>,
    /// Signals responder tasks that the entry's state changed out from
    /// under them (an RCAN/DCAN/DREQ arrived), so they can stop retrying
    /// without waiting out their current timeout.
    pub notify: tokio::sync::Notify,
}

pub struct ProviderEntryState {
    pub phase: ProviderState,
    pub cos: CoS,
    /// Whether an execution-responder task is currently running for this
    /// entry.
    pub executing: bool,
    pub freed: bool,
    pub result: Option<Vec<u8>>,
}

impl ProviderEntry {
    pub fn new(peer: PeerAddr, req_id: ReqId, cos: CoS) -> Arc<Self> {
        Arc::new(ProviderEntry {
            peer,
            req_id,
            state: AsyncMutex::new(ProviderEntryState {
                phase: ProviderState::Hreq,
                cos,
                executing: false,
                freed: true,
                result: None,
            }),
            notify: tokio::sync::Notify::new(),
        })
    }
}

#[derive(Default)]
pub struct ProviderRegistry {
    inner: StdMutex<HashMap<ProviderKey, Arc<ProviderEntry>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, peer: PeerAddr, req_id: ReqId, cos: CoS) -> Arc<ProviderEntry> {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        inner
            .entry((peer, req_id))
            .or_insert_with(|| ProviderEntry::new(peer, req_id, cos))
            .clone()
    }

    pub fn get(&self, peer: PeerAddr, req_id: ReqId) -> Option<Arc<ProviderEntry>> {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        inner.get(&(peer, req_id)).cloned()
    }

    pub fn remove(&self, peer: PeerAddr, req_id: ReqId) {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        inner.remove(&(peer, req_id));
    }
}

/// The observation log of HRES offers a consumer has seen (spec §3).
#[derive(Default)]
pub struct ResponseLog {
    inner: StdMutex<Vec<Response>>,
}

impl ResponseLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Response) {
        let mut inner = self.inner.lock().expect("response log mutex poisoned");
        inner.push(response);
    }

    pub fn snapshot(&self) -> Vec<Response> {
        let inner = self.inner.lock().expect("response log mutex poisoned");
        inner.clone()
    }
}
