//! Consumer FSM (spec §4.3): `send_request(cos_id, data) -> bytes | failure`.
//! Retry/timeout shape modeled on `gazette::journal::append`'s
//! retry-on-poll loop: a bounded outer loop of phases, each with its own
//! independent timeout and retry budget, any of which may be short-circuited
//! by a result the Answering Machine accepted out of band (a late `DRES`).

use std::time::{Instant, SystemTime};

use tokio::sync::mpsc;
use tokio::time::timeout as tokio_timeout;

use hostmesh_proto::{Packet, ReqId};

use crate::error::Error;
use crate::model::{Attempt, AttemptState, ReqState, Request, Response};
use crate::node::Node;
use crate::registry::Shared;
use crate::transport::{Inbound, PeerAddr};

enum Wait {
    Got(Inbound),
    TimedOut,
    /// `dres_at` was found set (by the Answering Machine, on an unrelated
    /// inbound packet) while we were waiting on something else entirely.
    AlreadyTerminal,
}

enum PhaseResult {
    Advance,
    Retry,
    Terminal,
}

/// Waits up to `budget` for an inbound packet matching `accept`, ignoring
/// (but not resetting the deadline for) anything else that arrives in the
/// meantime — this is the "continues waiting... bounded by the same
/// timeout" rule for late/foreign replies in spec §4.3/§4.4.
async fn wait_phase(
    replies: &mut mpsc::UnboundedReceiver<Inbound>,
    request: &Shared<Request>,
    budget: std::time::Duration,
    mut accept: impl FnMut(&Inbound) -> bool,
) -> Wait {
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Wait::TimedOut;
        }
        match tokio_timeout(remaining, replies.recv()).await {
            Ok(Some(inbound)) => {
                if request.lock().await.dres_at.is_some() {
                    return Wait::AlreadyTerminal;
                }
                if accept(&inbound) {
                    return Wait::Got(inbound);
                }
                continue;
            }
            Ok(None) | Err(_) => return Wait::TimedOut,
        }
    }
}

pub async fn send_request(node: &Node, cos_id: u32, data: Vec<u8>) -> Result<Vec<u8>, Error> {
    let cos = node.cos(cos_id)?;
    let req_id = node.consumer_registry.fresh_id();
    let mut request = Request::new(req_id, cos.clone(), data.clone());
    request.hreq_at = Some(Instant::now());
    let (shared, mut replies) = node.consumer_registry.insert(request);

    for outer in 1..=node.config.retries {
        if shared.lock().await.dres_at.is_some() {
            break;
        }
        let attempt_no = outer;
        {
            let mut req = shared.lock().await;
            req.attempts
                .insert(attempt_no, Attempt::new(req_id, attempt_no));
            req.state = ReqState::Hreq;
        }

        let host = match hreq_phase(node, &shared, &mut replies, req_id, cos_id, attempt_no).await
        {
            Some(host) => host,
            None => continue,
        };

        match rreq_phase(node, &shared, &mut replies, req_id, host, attempt_no).await {
            PhaseResult::Advance => {}
            PhaseResult::Retry => continue,
            PhaseResult::Terminal => break,
        }

        match dreq_phase(node, &shared, &mut replies, req_id, host, attempt_no, &data).await {
            PhaseResult::Advance => break,
            PhaseResult::Retry => continue,
            PhaseResult::Terminal => break,
        }
    }

    let finished = { shared.lock().await.clone() };
    node.consumer_registry.remove(&req_id);
    node.persist_request(&finished).await;
    node.export_tables().await;

    match finished.result {
        Some(bytes) => Ok(bytes),
        None => Err(Error::Failed),
    }
}

/// Step 1: broadcast `HREQ`, wait for the first matching `HRES`. The first
/// responder wins; tie-break is "first observed by this receive loop"
/// (resolved in DESIGN.md).
async fn hreq_phase(
    node: &Node,
    shared: &Shared<Request>,
    replies: &mut mpsc::UnboundedReceiver<Inbound>,
    req_id: ReqId,
    cos_id: u32,
    attempt_no: u32,
) -> Option<PeerAddr> {
    {
        let mut req = shared.lock().await;
        if let Some(attempt) = req.attempts.get_mut(&attempt_no) {
            attempt.hreq_at = Some(Instant::now());
        }
    }

    let packet = Packet::Hreq {
        req_id,
        attempt_no,
        cos_id,
    };
    node.transport.broadcast(&packet).await.ok()?;

    let outcome = wait_phase(replies, shared, node.config.timeout, |inbound| {
        matches!(
            &inbound.packet,
            Packet::Hres { req_id: r, attempt_no: a, .. } if *r == req_id && *a == attempt_no
        )
    })
    .await;

    let Wait::Got(inbound) = outcome else {
        return None;
    };
    let Packet::Hres {
        cpu_offer,
        ram_offer,
        disk_offer,
        ..
    } = inbound.packet
    else {
        return None;
    };
    let from = inbound.from;

    let mut req = shared.lock().await;
    req.host = Some(from);
    req.state = ReqState::Rreq;
    if let Some(attempt) = req.attempts.get_mut(&attempt_no) {
        attempt.host = Some(from);
        attempt.hres_at = Some(Instant::now());
        attempt.state = AttemptState::Rreq;
    }
    drop(req);

    let response = Response {
        req_id,
        attempt_no,
        host: from,
        cpu: cpu_offer,
        ram: ram_offer,
        disk: disk_offer,
        timestamp: SystemTime::now(),
    };
    node.response_log.push(response);
    node.persist_response(response).await;

    Some(from)
}

/// Step 2: unicast `RREQ` to the chosen host, up to `PROTOCOL_RETRIES`
/// times within this outer attempt.
async fn rreq_phase(
    node: &Node,
    shared: &Shared<Request>,
    replies: &mut mpsc::UnboundedReceiver<Inbound>,
    req_id: ReqId,
    host: PeerAddr,
    attempt_no: u32,
) -> PhaseResult {
    for _ in 0..node.config.retries {
        if node
            .transport
            .unicast(host, &Packet::Rreq { req_id })
            .await
            .is_err()
        {
            continue;
        }

        let outcome = wait_phase(replies, shared, node.config.timeout, |inbound| {
            inbound.from == host
                && matches!(inbound.packet, Packet::Rres { .. } | Packet::Rcan { .. })
        })
        .await;

        match outcome {
            Wait::AlreadyTerminal => return PhaseResult::Terminal,
            Wait::TimedOut => continue,
            Wait::Got(inbound) => match inbound.packet {
                Packet::Rres { .. } => {
                    let mut req = shared.lock().await;
                    req.state = ReqState::Dreq;
                    if let Some(attempt) = req.attempts.get_mut(&attempt_no) {
                        attempt.rres_at = Some(Instant::now());
                        attempt.state = AttemptState::Dreq;
                    }
                    return PhaseResult::Advance;
                }
                Packet::Rcan { .. } => {
                    let mut req = shared.lock().await;
                    if let Some(attempt) = req.attempts.get_mut(&attempt_no) {
                        attempt.state = AttemptState::Rcan;
                    }
                    return PhaseResult::Retry;
                }
                _ => unreachable!("wait_phase only admits Rres|Rcan"),
            },
        }
    }

    let mut req = shared.lock().await;
    if let Some(attempt) = req.attempts.get_mut(&attempt_no) {
        attempt.state = AttemptState::Rcan;
    }
    PhaseResult::Retry
}

/// Step 3: unicast `DREQ`, up to `PROTOCOL_RETRIES` times, with the budget
/// reset on every `DWAIT` (execution in progress on the provider's side).
async fn dreq_phase(
    node: &Node,
    shared: &Shared<Request>,
    replies: &mut mpsc::UnboundedReceiver<Inbound>,
    req_id: ReqId,
    host: PeerAddr,
    attempt_no: u32,
    data: &[u8],
) -> PhaseResult {
    let mut retries_left = node.config.retries;
    loop {
        if retries_left == 0 {
            let mut req = shared.lock().await;
            req.late = true;
            if let Some(attempt) = req.attempts.get_mut(&attempt_no) {
                attempt.state = AttemptState::Dcan;
            }
            return PhaseResult::Retry;
        }
        retries_left -= 1;

        let packet = Packet::Dreq {
            req_id,
            attempt_no,
            data: data.to_vec(),
        };
        if node.transport.unicast(host, &packet).await.is_err() {
            continue;
        }

        let outcome = wait_phase(replies, shared, node.config.timeout, |inbound| {
            inbound.from == host
                && matches!(
                    inbound.packet,
                    Packet::Dres { .. } | Packet::Dwait { .. } | Packet::Dcan { .. }
                )
        })
        .await;

        match outcome {
            Wait::AlreadyTerminal => return PhaseResult::Terminal,
            Wait::TimedOut => continue,
            Wait::Got(inbound) => match inbound.packet {
                Packet::Dwait { .. } => {
                    retries_left = node.config.retries;
                    continue;
                }
                Packet::Dcan { .. } => {
                    let mut req = shared.lock().await;
                    if let Some(attempt) = req.attempts.get_mut(&attempt_no) {
                        attempt.state = AttemptState::Dcan;
                    }
                    return PhaseResult::Retry;
                }
                Packet::Dres { .. } => {
                    // The dispatcher's Answering Machine owns every `DRES`
                    // acceptance decision (the atomic dres_at/host/result
                    // write and the matching DACK/DCAN), same-host or
                    // cross-host alike, so by the time this phase observes
                    // one from the expected host it has already been
                    // applied. Nothing left to do but advance.
                    return PhaseResult::Advance;
                }
                _ => unreachable!("wait_phase only admits Dres|Dwait|Dcan"),
            },
        }
    }
}
