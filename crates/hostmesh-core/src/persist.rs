//! The seam the core protocol uses to reach the key-value/relational
//! persistence layer (spec §1, §4.6): `insert`, `update`, `select`,
//! `export_csv`. The concrete implementation (sqlite-backed, single-writer)
//! lives in the sibling `hostmesh-store` crate so this crate never depends
//! on a storage engine directly.

use std::path::Path;

use hostmesh_proto::ReqId;

use crate::model::{CoS, Request, Response};

/// Boxed error: the persistence layer's own failure modes (I/O, schema,
/// serialization) are opaque to the protocol core, which only ever logs a
/// persistence failure — it never affects the outcome already returned to
/// the caller (spec §7).
pub type PersistError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[async_trait::async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// The full set of Classes of Service, loaded once at startup.
    async fn load_cos_table(&self) -> Result<Vec<CoS>, PersistError>;

    /// Every request id already on record, used to seed the consumer
    /// registry so a freshly generated id never collides with one already
    /// persisted (spec invariant 1).
    async fn known_request_ids(&self) -> Result<Vec<ReqId>, PersistError>;

    /// Insert or update a completed request, its attempts, and the host it
    /// finished with. Called once per request, after it reaches `DRES` or
    /// `FAIL` (spec §3 Lifecycle).
    async fn persist_request(&self, request: &Request) -> Result<(), PersistError>;

    /// Append one observed HRES to the `responses` table.
    async fn persist_response(&self, response: &Response) -> Result<(), PersistError>;

    /// Export the `cos`, `requests`, `attempts`, `responses` tables as CSV
    /// files under `out_dir`, one file per table (spec §6).
    async fn export_csv(&self, out_dir: &Path) -> Result<(), PersistError>;
}
