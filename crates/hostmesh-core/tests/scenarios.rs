//! End-to-end scenarios run over `SimTransport`, one task per node, no real
//! sockets. Mirrors the seeded scenarios: happy path, two-provider race,
//! insufficient resources, late DRES, total failure, broadcast self-ignore.

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use hostmesh_core::transport::sim::SimMedium;
use hostmesh_core::transport::{SimTransport, Transport};
use hostmesh_core::{
    dispatcher, send_request, CoS, Error, Ledger, Node, ProtocolConfig, Request, SimulatedExecutor,
    StaticMonitor,
};
use hostmesh_proto::{Packet, ReqId};

fn addr(last: u8) -> SocketAddr {
    format!("127.0.0.1:{}", 20000 + last as u16)
        .to_socket_addrs()
        .unwrap()
        .next()
        .unwrap()
}

fn fast_config() -> ProtocolConfig {
    ProtocolConfig {
        timeout: Duration::from_millis(120),
        retries: 3,
        verbose: false,
        simulation_active: false,
    }
}

fn node(
    medium: &SimMedium,
    who: SocketAddr,
    capacity: hostmesh_core::Requirements,
    cos_table: HashMap<u32, CoS>,
) -> Arc<Node> {
    let transport: Arc<dyn Transport> = Arc::new(SimTransport::join(medium, who));
    let executor = Arc::new(SimulatedExecutor::new(
        Duration::from_millis(1),
        Duration::from_millis(5),
    ));
    Arc::new(Node::new(
        Ledger::new(Box::new(StaticMonitor::new(capacity))),
        transport,
        executor,
        None,
        cos_table,
        fast_config(),
    ))
}

fn permissive_cos_table() -> HashMap<u32, CoS> {
    let mut table = HashMap::new();
    table.insert(1, CoS::permissive(1, "default"));
    table
}

#[tokio::test]
async fn happy_path_single_provider() {
    let medium = SimMedium::new();
    let a = node(&medium, addr(1), hostmesh_core::Requirements::ZERO, permissive_cos_table());
    let b = node(
        &medium,
        addr(2),
        hostmesh_core::Requirements { cpu: 4, ram: 4096.0, disk: 40.0 },
        permissive_cos_table(),
    );

    tokio::spawn(dispatcher::run(a.clone()));
    tokio::spawn(dispatcher::run(b.clone()));

    let before = b.ledger.snapshot();
    let result = send_request(&a, 1, b"data + program".to_vec()).await;
    assert_eq!(result.unwrap(), b"result".to_vec());
    assert_eq!(b.ledger.snapshot(), before, "b's ledger must return to its starting snapshot");
}

#[tokio::test]
async fn two_provider_race_picks_first_observed_hres() {
    let medium = SimMedium::new();
    let a = node(&medium, addr(10), hostmesh_core::Requirements::ZERO, permissive_cos_table());
    let b = node(
        &medium,
        addr(11),
        hostmesh_core::Requirements { cpu: 4, ram: 4096.0, disk: 40.0 },
        permissive_cos_table(),
    );
    let c = node(
        &medium,
        addr(12),
        hostmesh_core::Requirements { cpu: 4, ram: 4096.0, disk: 40.0 },
        permissive_cos_table(),
    );

    tokio::spawn(dispatcher::run(a.clone()));
    tokio::spawn(dispatcher::run(b.clone()));
    // C's inbox (via SimTransport::join above) is already filling, but its
    // Answering Machine only starts consuming it after B has had time to
    // answer first — standing in for "C replies 50ms later".
    let c_clone = c.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        dispatcher::run(c_clone).await;
    });

    let result = send_request(&a, 1, b"payload".to_vec()).await.unwrap();
    assert_eq!(result, b"result".to_vec());
    assert_eq!(c.ledger.snapshot(), hostmesh_core::Requirements { cpu: 4, ram: 4096.0, disk: 40.0 });
}

#[tokio::test]
async fn dispatcher_cancels_an_rres_from_an_unexpected_host() {
    let medium = SimMedium::new();
    let a = node(&medium, addr(20), hostmesh_core::Requirements::ZERO, permissive_cos_table());
    tokio::spawn(dispatcher::run(a.clone()));

    let b_addr = addr(21);
    let c_addr = addr(22);
    let cos = CoS::permissive(1, "default");
    let req_id = a.consumer_registry.fresh_id();
    let mut request = Request::new(req_id, cos, b"payload".to_vec());
    request.host = Some(b_addr);
    let (shared, _replies) = a.consumer_registry.insert(request);

    let c_transport = SimTransport::join(&medium, c_addr);
    c_transport
        .unicast(a.transport.local_addrs()[0], &Packet::Rres { req_id })
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    loop {
        if let Ok(Ok(inbound)) = tokio::time::timeout(
            deadline.saturating_duration_since(tokio::time::Instant::now()),
            c_transport.recv(),
        )
        .await
        {
            if inbound.from == a.transport.local_addrs()[0]
                && matches!(inbound.packet, Packet::Rcan { req_id: r } if r == req_id)
            {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("never observed RCAN for the mismatched host");
            }
            continue;
        }
        panic!("timed out waiting for RCAN");
    }

    assert_eq!(shared.lock().await.host, Some(b_addr), "the registered host must not change");
}

#[tokio::test]
async fn late_dres_is_accepted_once_and_a_later_foreign_dres_is_cancelled() {
    let medium = SimMedium::new();
    let a = node(&medium, addr(30), hostmesh_core::Requirements::ZERO, permissive_cos_table());
    tokio::spawn(dispatcher::run(a.clone()));

    let b_addr = addr(31);
    let c_addr = addr(32);
    let cos = CoS::permissive(1, "default");
    let req_id = a.consumer_registry.fresh_id();
    let mut request = Request::new(req_id, cos, b"payload".to_vec());
    request.late = true; // attempt 1 already timed out; still accepting a late result
    let (shared, _replies) = a.consumer_registry.insert(request);

    let b_transport = SimTransport::join(&medium, b_addr);
    let c_transport = SimTransport::join(&medium, c_addr);

    b_transport
        .unicast(
            a.transport.local_addrs()[0],
            &Packet::Dres { req_id, attempt_no: 1, data: b"from-b".to_vec() },
        )
        .await
        .unwrap();

    wait_for(|| async {
        let request = shared.lock().await;
        request.dres_at.is_some() && request.host == Some(b_addr)
    })
    .await;
    assert_eq!(shared.lock().await.result, Some(b"from-b".to_vec()));

    c_transport
        .unicast(
            a.transport.local_addrs()[0],
            &Packet::Dres { req_id, attempt_no: 2, data: b"from-c".to_vec() },
        )
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            panic!("never observed DCAN answering C's foreign DRES");
        }
        match tokio::time::timeout(remaining, c_transport.recv()).await {
            Ok(Ok(inbound))
                if inbound.from == a.transport.local_addrs()[0]
                    && matches!(inbound.packet, Packet::Dcan { req_id: r } if r == req_id) =>
            {
                break;
            }
            _ => continue,
        }
    }

    // The accepted result must still be B's, never overwritten by C.
    let request = shared.lock().await;
    assert_eq!(request.host, Some(b_addr));
    assert_eq!(request.result, Some(b"from-b".to_vec()));
}

#[tokio::test]
async fn hreq_against_an_insufficiently_resourced_node_produces_no_reply() {
    let medium = SimMedium::new();
    let mut demanding_cos = HashMap::new();
    demanding_cos.insert(1, {
        let mut cos = CoS::permissive(1, "heavy");
        cos.min_cpu = 64;
        cos
    });

    let b = node(
        &medium,
        addr(41),
        hostmesh_core::Requirements { cpu: 4, ram: 4096.0, disk: 40.0 },
        demanding_cos,
    );
    tokio::spawn(dispatcher::run(b.clone()));

    let observer = SimTransport::join(&medium, addr(42));
    observer
        .broadcast(&Packet::Hreq { req_id: ReqId::generate(), attempt_no: 1, cos_id: 1 })
        .await
        .unwrap();

    // Only the observer's own echoed broadcast should ever arrive; B must
    // never answer since it cannot satisfy `min_cpu = 64`.
    let first = tokio::time::timeout(Duration::from_millis(200), observer.recv())
        .await
        .expect("expected the self-echoed HREQ");
    assert!(matches!(first.unwrap().packet, Packet::Hreq { .. }));
    let second = tokio::time::timeout(Duration::from_millis(200), observer.recv()).await;
    assert!(second.is_err(), "node B must stay silent when it cannot satisfy the CoS");
}

#[tokio::test]
async fn broadcasting_node_never_answers_its_own_hreq() {
    let medium = SimMedium::new();
    let a = node(
        &medium,
        addr(50),
        hostmesh_core::Requirements { cpu: 4, ram: 4096.0, disk: 40.0 },
        permissive_cos_table(),
    );
    tokio::spawn(dispatcher::run(a.clone()));

    let observer = SimTransport::join(&medium, addr(51));
    a.transport
        .broadcast(&Packet::Hreq { req_id: ReqId::generate(), attempt_no: 1, cos_id: 1 })
        .await
        .unwrap();

    let first = tokio::time::timeout(Duration::from_millis(200), observer.recv())
        .await
        .expect("expected to observe the broadcast itself")
        .unwrap();
    assert!(matches!(first.packet, Packet::Hreq { .. }));
    let second = tokio::time::timeout(Duration::from_millis(200), observer.recv()).await;
    assert!(second.is_err(), "a must never reply HRES to its own broadcast");
}

#[tokio::test]
async fn total_failure_when_no_provider_has_capacity() {
    let medium = SimMedium::new();
    let mut demanding_cos = HashMap::new();
    demanding_cos.insert(1, {
        let mut cos = CoS::permissive(1, "heavy");
        cos.min_cpu = 64;
        cos
    });
    let a = node(&medium, addr(60), hostmesh_core::Requirements::ZERO, demanding_cos.clone());
    let b = node(
        &medium,
        addr(61),
        hostmesh_core::Requirements { cpu: 4, ram: 4096.0, disk: 40.0 },
        demanding_cos,
    );
    tokio::spawn(dispatcher::run(a.clone()));
    tokio::spawn(dispatcher::run(b.clone()));

    let before = b.ledger.snapshot();
    let result = send_request(&a, 1, b"payload".to_vec()).await;
    assert!(matches!(result, Err(Error::Failed)));
    assert_eq!(b.ledger.snapshot(), before);
}

/// Polls `predicate` until it returns `true` or a short deadline elapses.
async fn wait_for<F, Fut>(mut predicate: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    loop {
        if predicate().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition never became true");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
