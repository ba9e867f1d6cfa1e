//! An in-process transport for tests and the CLI's single-process demo
//! mode, fanning broadcast out over a `tokio::sync::broadcast` channel the
//! way `automations`/`gazette` use broadcast channels for fan-out
//! notifications.

use tokio::sync::{broadcast, mpsc, Mutex};

use hostmesh_proto::Packet;

use super::{Error, Inbound, PeerAddr, Transport};

const CHANNEL_CAPACITY: usize = 1024;

/// A shared, in-memory broadcast medium. Every `SimTransport` built from the
/// same `SimMedium` observes every other member's broadcasts and unicasts
/// addressed to it.
#[derive(Clone)]
pub struct SimMedium {
    bus: broadcast::Sender<(PeerAddr, Packet)>,
}

impl SimMedium {
    pub fn new() -> Self {
        let (bus, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        SimMedium { bus }
    }
}

impl Default for SimMedium {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SimTransport {
    addr: PeerAddr,
    bus: broadcast::Sender<(PeerAddr, Packet)>,
    inbox: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    _pump: tokio::task::JoinHandle<()>,
}

impl SimTransport {
    /// Join `medium` as a new peer at `addr`.
    pub fn join(medium: &SimMedium, addr: PeerAddr) -> Self {
        let mut bus_rx = medium.bus.subscribe();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        let pump = tokio::spawn(async move {
            loop {
                match bus_rx.recv().await {
                    Ok((from, packet)) => {
                        if inbox_tx.send(Inbound { from, packet }).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        SimTransport {
            addr,
            bus: medium.bus.clone(),
            inbox: Mutex::new(inbox_rx),
            _pump: pump,
        }
    }
}

#[async_trait::async_trait]
impl Transport for SimTransport {
    async fn broadcast(&self, packet: &Packet) -> Result<(), Error> {
        // A real broadcast medium delivers to every listener including the
        // sender; self-echo suppression happens in the Answering Machine.
        let _ = self.bus.send((self.addr, packet.clone()));
        Ok(())
    }

    async fn unicast(&self, _to: PeerAddr, packet: &Packet) -> Result<(), Error> {
        // The shared medium doesn't filter by destination (spec §4.1); every
        // peer's receive loop sees every packet and decides for itself
        // whether it's addressed to them via req_id/source matching.
        let _ = self.bus.send((self.addr, packet.clone()));
        Ok(())
    }

    async fn recv(&self) -> Result<Inbound, Error> {
        let mut inbox = self.inbox.lock().await;
        match inbox.recv().await {
            Some(inbound) => Ok(inbound),
            None => std::future::pending().await,
        }
    }

    fn local_addrs(&self) -> Vec<PeerAddr> {
        vec![self.addr]
    }
}
