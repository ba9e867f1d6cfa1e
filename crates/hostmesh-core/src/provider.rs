//! Provider FSM (spec §4.4): the answering branches for `HREQ`, `RREQ`,
//! `DREQ` and `DACK`, plus the reservation-responder and
//! execution-responder background tasks. Modeled on
//! `automations::server::serve`'s one-task-per-ready-unit spawn pattern.

use std::sync::Arc;

use hostmesh_proto::{Packet, ReqId};

use crate::model::ProviderState;
use crate::node::Node;
use crate::registry::ProviderEntry;
use crate::transport::PeerAddr;

/// `HREQ`: bind the (possibly-changed) CoS, check the ledger, and either
/// offer or stay silent. Repeated `HREQ`s for an entry already in `DRES`
/// are ignored — the request is already complete.
pub async fn on_hreq(node: &Arc<Node>, from: PeerAddr, req_id: ReqId, attempt_no: u32, cos_id: u32) {
    let cos = match node.cos(cos_id) {
        Ok(cos) => cos,
        Err(_) => return,
    };
    let entry = node.provider_registry.get_or_create(from, req_id, cos.clone());
    let mut state = entry.state.lock().await;
    if state.phase == ProviderState::Dres {
        return;
    }
    state.cos = cos.clone();
    if state.phase != ProviderState::Hreq && state.phase != ProviderState::Hres {
        return;
    }
    if node.ledger.check(&cos.requirements()) {
        let offer = node.ledger.snapshot();
        state.phase = ProviderState::Hres;
        drop(state);
        let _ = node
            .transport
            .unicast(
                from,
                &Packet::Hres {
                    req_id,
                    attempt_no,
                    cpu_offer: offer.cpu,
                    ram_offer: offer.ram,
                    disk_offer: offer.disk,
                },
            )
            .await;
    }
    // Otherwise: insufficient resources, stay in HREQ, send nothing.
}

/// `RREQ`: try to reserve; on success spawn the reservation-responder; on
/// failure (resources became insufficient between `HRES` and `RREQ`) reply
/// `RCAN` immediately and revert to `HREQ`.
pub async fn on_rreq(node: &Arc<Node>, from: PeerAddr, req_id: ReqId) {
    let Some(entry) = node.provider_registry.get(from, req_id) else {
        return;
    };
    let need = {
        let state = entry.state.lock().await;
        if state.phase != ProviderState::Hres {
            return;
        }
        state.cos.requirements()
    };

    if node.ledger.reserve(&need) {
        let mut state = entry.state.lock().await;
        state.phase = ProviderState::Rres;
        state.freed = false;
        drop(state);
        let node = node.clone();
        let entry = entry.clone();
        tokio::spawn(async move { reservation_responder(node, entry, req_id, from).await });
    } else {
        let _ = node.transport.unicast(from, &Packet::Rcan { req_id }).await;
        let mut state = entry.state.lock().await;
        state.phase = ProviderState::Hreq;
    }
}

/// Sends `RRES` and retries until a `DREQ` arrives (observed as
/// `executing` flipping to true, or the phase otherwise advancing past
/// `RRES`), an `RCAN` reverts the entry to `HREQ`, or the retry budget is
/// exhausted.
async fn reservation_responder(node: Arc<Node>, entry: Arc<ProviderEntry>, req_id: ReqId, consumer: PeerAddr) {
    for _ in 0..node.config.retries {
        if node
            .transport
            .unicast(consumer, &Packet::Rres { req_id })
            .await
            .is_err()
        {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(node.config.timeout) => {}
            _ = entry.notify.notified() => {}
        }

        let state = entry.state.lock().await;
        if state.phase != ProviderState::Rres || state.executing {
            // A DREQ was processed (implicit acceptance, DESIGN.md open
            // question 3) or an RCAN reverted the entry. Either way this
            // responder's job is done.
            return;
        }
        drop(state);
    }

    let mut state = entry.state.lock().await;
    if state.phase == ProviderState::Rres && !state.executing {
        state.phase = ProviderState::Hreq;
        if !state.freed {
            node.ledger.free(&state.cos.requirements());
            state.freed = true;
        }
        drop(state);
        let _ = node.transport.unicast(consumer, &Packet::Rcan { req_id }).await;
    }
}

/// `DREQ`: resend a cached `DRES` if already complete, reply `DWAIT` if an
/// execution-responder is already running, silently re-reserve if the entry
/// had reverted to `HREQ`, or spawn the execution-responder.
pub async fn on_dreq(
    node: &Arc<Node>,
    from: PeerAddr,
    req_id: ReqId,
    attempt_no: u32,
    data: Vec<u8>,
) {
    let Some(entry) = node.provider_registry.get(from, req_id) else {
        return;
    };

    let mut state = entry.state.lock().await;
    match state.phase {
        ProviderState::Dres => {
            if let Some(result) = state.result.clone() {
                drop(state);
                let _ = node
                    .transport
                    .unicast(from, &Packet::Dres { req_id, attempt_no, data: result })
                    .await;
            }
            return;
        }
        ProviderState::Rres if state.executing => {
            drop(state);
            let _ = node.transport.unicast(from, &Packet::Dwait { req_id }).await;
            return;
        }
        ProviderState::Rres => {
            state.executing = true;
            drop(state);
            entry.notify.notify_waiters();
        }
        ProviderState::Hreq => {
            let need = state.cos.requirements();
            if node.ledger.reserve(&need) {
                state.phase = ProviderState::Rres;
                state.freed = false;
                state.executing = true;
                drop(state);
                entry.notify.notify_waiters();
            } else {
                drop(state);
                let _ = node.transport.unicast(from, &Packet::Dcan { req_id }).await;
                return;
            }
        }
        ProviderState::Hres => {
            // No reservation exists yet; a DREQ without a preceding RREQ
            // has nothing to execute against.
            drop(state);
            let _ = node.transport.unicast(from, &Packet::Dcan { req_id }).await;
            return;
        }
    }

    let node = node.clone();
    let entry = entry.clone();
    tokio::spawn(
        async move { execution_responder(node, entry, req_id, attempt_no, from, data).await },
    );
}

/// Executes the payload, replies `DRES`, and retries until `DACK` frees the
/// reservation, a `DCAN` arrives, or the retry budget is exhausted.
async fn execution_responder(
    node: Arc<Node>,
    entry: Arc<ProviderEntry>,
    req_id: ReqId,
    attempt_no: u32,
    consumer: PeerAddr,
    data: Vec<u8>,
) {
    let result = node.executor.execute(&data).await;

    {
        let mut state = entry.state.lock().await;
        state.phase = ProviderState::Dres;
        state.result = Some(result.clone());
    }

    for _ in 0..node.config.retries {
        if node
            .transport
            .unicast(
                consumer,
                &Packet::Dres {
                    req_id,
                    attempt_no,
                    data: result.clone(),
                },
            )
            .await
            .is_err()
        {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(node.config.timeout) => {}
            _ = entry.notify.notified() => {}
        }

        let state = entry.state.lock().await;
        if state.freed {
            return;
        }
        drop(state);
    }

    let mut state = entry.state.lock().await;
    if !state.freed {
        node.ledger.free(&state.cos.requirements());
        state.freed = true;
    }
}

/// `DACK`: frees the reservation exactly once. Ignored for any entry not in
/// `DRES`.
pub async fn on_dack(node: &Arc<Node>, from: PeerAddr, req_id: ReqId) {
    let Some(entry) = node.provider_registry.get(from, req_id) else {
        return;
    };
    let mut state = entry.state.lock().await;
    if state.phase != ProviderState::Dres || state.freed {
        return;
    }
    node.ledger.free(&state.cos.requirements());
    state.freed = true;
    entry.notify.notify_waiters();
}

/// `RCAN` addressed to a provider-side entry: the consumer revoked an
/// offer. Free the reservation if one is held and revert to `HREQ`.
pub async fn on_rcan(node: &Arc<Node>, from: PeerAddr, req_id: ReqId) {
    let Some(entry) = node.provider_registry.get(from, req_id) else {
        return;
    };
    let mut state = entry.state.lock().await;
    if state.phase == ProviderState::Rres && !state.freed {
        node.ledger.free(&state.cos.requirements());
        state.freed = true;
    }
    state.phase = ProviderState::Hreq;
    state.executing = false;
    drop(state);
    entry.notify.notify_waiters();
}
