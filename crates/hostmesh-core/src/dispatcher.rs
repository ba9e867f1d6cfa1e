//! The Answering Machine (spec §4.2): the inbound-packet dispatch loop.
//! Dispatch-by-tag is modeled on `automations::Server::register`'s
//! handler-table idea, adapted from a `TaskType`-keyed table to a
//! `State`-keyed match, per spec §9's explicit call for "a tagged variant
//! with a handler table" in place of a long conditional chain.
//!
//! This is also where every `DRES` acceptance decision lives (own/foreign,
//! late or not) — the single place that ever writes `dres_at`/`host`/
//! `result`, satisfying the "treat (read dres_at, mutate) as one critical
//! section" resolution in DESIGN.md.

use std::sync::Arc;
use std::time::Instant;

use hostmesh_proto::Packet;

use crate::model::{AttemptState, ReqState};
use crate::node::Node;
use crate::provider;
use crate::transport::Inbound;

/// Runs the receive loop until the transport errors out or is closed.
/// Spawned as its own task by whatever wires up a `Node` (spec §5: "the
/// answering-machine sniffer" is one of the node's parallel worker tasks).
pub async fn run(node: Arc<Node>) {
    loop {
        let inbound = match node.transport.recv().await {
            Ok(inbound) => inbound,
            Err(err) => {
                tracing::warn!(%err, "transport recv failed, stopping answering machine");
                return;
            }
        };
        dispatch(&node, inbound).await;
    }
}

async fn dispatch(node: &Arc<Node>, inbound: Inbound) {
    if node.transport.local_addrs().contains(&inbound.from) {
        return; // spec §4.2: never answer our own broadcast (scenario 6).
    }

    let from = inbound.from;
    match inbound.packet.clone() {
        Packet::Hreq {
            req_id,
            attempt_no,
            cos_id,
        } => provider::on_hreq(node, from, req_id, attempt_no, cos_id).await,

        Packet::Hres { req_id, .. } => {
            node.consumer_registry.deliver(&req_id, inbound);
        }

        Packet::Rreq { req_id } => provider::on_rreq(node, from, req_id).await,

        Packet::Rres { req_id } => {
            if let Some(shared) = node.consumer_registry.get(&req_id) {
                let request = shared.lock().await;
                let mismatched_host = request.host.is_some() && request.host != Some(from);
                drop(request);
                if mismatched_host {
                    let _ = node.transport.unicast(from, &Packet::Rcan { req_id }).await;
                }
                node.consumer_registry.deliver(&req_id, inbound);
            }
        }

        Packet::Rcan { req_id } => {
            if node.provider_registry.get(from, req_id).is_some() {
                provider::on_rcan(node, from, req_id).await;
            } else {
                node.consumer_registry.deliver(&req_id, inbound);
            }
        }

        Packet::Dreq {
            req_id,
            attempt_no,
            data,
        } => provider::on_dreq(node, from, req_id, attempt_no, data).await,

        Packet::Dres {
            req_id,
            attempt_no,
            data,
        } => handle_dres(node, from, req_id, attempt_no, data, inbound).await,

        Packet::Dack { req_id } => provider::on_dack(node, from, req_id).await,

        Packet::Dcan { req_id } => {
            // A DCAN can arrive at either role: the provider, cancelling an
            // in-flight execution, or the consumer, cancelling a reservation
            // it no longer wants served. Both sides interpret it the same
            // way, so route to whichever registry actually has an entry.
            if node.provider_registry.get(from, req_id).is_some() {
                provider::on_rcan(node, from, req_id).await;
            } else {
                node.consumer_registry.deliver(&req_id, inbound);
            }
        }

        Packet::Dwait { req_id } => {
            node.consumer_registry.deliver(&req_id, inbound);
        }
    }
}

/// Spec §4.4, "Late/cross responses", the `DRES` half: accepted iff
/// `dres_at` is unset and either the sender is the currently selected host
/// or the request has been marked `late`. Otherwise answered with `DACK`
/// (repeated same-host) or `DCAN` (foreign, already decided).
async fn handle_dres(
    node: &Arc<Node>,
    from: crate::transport::PeerAddr,
    req_id: hostmesh_proto::ReqId,
    attempt_no: u32,
    data: Vec<u8>,
    inbound: Inbound,
) {
    let Some(shared) = node.consumer_registry.get(&req_id) else {
        return;
    };

    let mut request = shared.lock().await;
    if request.dres_at.is_none() {
        if request.host == Some(from) || request.late {
            request.dres_at = Some(Instant::now());
            request.host = Some(from);
            request.result = Some(data);
            request.state = ReqState::Dres;
            if let Some(attempt) = request.attempts.get_mut(&attempt_no) {
                attempt.dres_at = Some(Instant::now());
                attempt.state = AttemptState::Dres;
            }
            drop(request);
            let _ = node.transport.unicast(from, &Packet::Dack { req_id }).await;
        }
        // else: neither the expected host nor a late-eligible request —
        // ignore; the consumer FSM's own DREQ-phase wait keeps its budget.
    } else if request.host == Some(from) {
        drop(request);
        let _ = node.transport.unicast(from, &Packet::Dack { req_id }).await;
    } else {
        drop(request);
        let _ = node.transport.unicast(from, &Packet::Dcan { req_id }).await;
    }

    node.consumer_registry.deliver(&req_id, inbound);
}
