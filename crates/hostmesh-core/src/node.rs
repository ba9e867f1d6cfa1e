//! Wires the ledger, registries, transport, executor and persistence
//! adapter into one handle (spec §9: "construct once in main and pass
//! handles down; avoid any global init-on-first-use pattern").

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ProtocolConfig;
use crate::error::Error;
use crate::executor::Executor;
use crate::ledger::Ledger;
use crate::model::{CoS, Request};
use crate::net;
use crate::persist::PersistenceAdapter;
use crate::registry::{ConsumerRegistry, ProviderRegistry, ResponseLog};
use crate::transport::SharedTransport;

const EXPORT_DIR: &str = "export";

pub struct Node {
    pub ledger: Ledger,
    pub transport: SharedTransport,
    pub executor: Arc<dyn Executor>,
    pub consumer_registry: ConsumerRegistry,
    pub provider_registry: ProviderRegistry,
    pub response_log: ResponseLog,
    pub persistence: Option<Arc<dyn PersistenceAdapter>>,
    pub cos_table: HashMap<u32, CoS>,
    pub config: ProtocolConfig,
}

impl Node {
    pub fn new(
        ledger: Ledger,
        transport: SharedTransport,
        executor: Arc<dyn Executor>,
        persistence: Option<Arc<dyn PersistenceAdapter>>,
        cos_table: HashMap<u32, CoS>,
        config: ProtocolConfig,
    ) -> Self {
        Node {
            ledger,
            transport,
            executor,
            consumer_registry: ConsumerRegistry::new(),
            provider_registry: ProviderRegistry::new(),
            response_log: ResponseLog::new(),
            persistence,
            cos_table,
            config,
        }
    }

    /// Pre-seeds the consumer registry's id-collision check with every
    /// `req_id` already on record (spec invariant 1).
    pub async fn seed_known_ids(&self) -> Result<(), Error> {
        let Some(store) = &self.persistence else {
            return Ok(());
        };
        match store.known_request_ids().await {
            Ok(ids) => {
                for id in ids {
                    self.consumer_registry.seed_known_id(id);
                }
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%err, "failed to load known request ids from persistence");
                Ok(())
            }
        }
    }

    pub fn cos(&self, id: u32) -> Result<CoS, Error> {
        self.cos_table.get(&id).cloned().ok_or(Error::UnknownCos(id))
    }

    /// Persists a finished request (terminal `DRES` or `FAIL`). Failure here
    /// is logged and never affects the result already returned to the
    /// caller (spec §7).
    pub async fn persist_request(&self, request: &Request) {
        let Some(store) = &self.persistence else {
            return;
        };
        if let Err(err) = store.persist_request(request).await {
            tracing::error!(req_id = %request.id, %err, "failed to persist request");
        }
    }

    pub async fn persist_response(&self, response: crate::model::Response) {
        if let Some(store) = &self.persistence {
            if let Err(err) = store.persist_response(&response).await {
                tracing::error!(req_id = %response.req_id, %err, "failed to persist response");
            }
        }
    }

    /// Exports every persisted table to CSV (spec §6), named after this
    /// node's primary IP when simulation is active. Called once a consumer
    /// request has reached `DRES` or `FAIL` and been persisted. Failure here
    /// is logged only, same as `persist_request`.
    pub async fn export_tables(&self) {
        let Some(store) = &self.persistence else {
            return;
        };
        let mut out_dir = PathBuf::from(EXPORT_DIR);
        if self.config.simulation_active {
            if let Some(ip) = net::local_ip() {
                out_dir.push(ip.to_string());
            }
        }
        if let Err(err) = store.export_csv(&out_dir).await {
            tracing::error!(%err, "failed to export CSV tables");
        }
    }
}
