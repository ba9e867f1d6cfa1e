use std::path::{Path, PathBuf};

use tokio::sync::oneshot;

use hostmesh_core::{CoS, PersistError, PersistenceAdapter, Request, Response};
use hostmesh_proto::ReqId;

use crate::error::Error;
use crate::worker::{Job, Worker};

/// `rusqlite`-backed `PersistenceAdapter` (spec §4.6), matching
/// `catalog::create`/`catalog::open`'s `:memory:` special-casing and the
/// exact `rusqlite` version/features `estuary-flow`'s workspace already
/// depends on.
pub struct SqliteStore {
    worker: Worker,
}

impl SqliteStore {
    pub fn open(database_path: &str, database_defs_path: Option<&Path>) -> Result<Self, Error> {
        Ok(SqliteStore {
            worker: Worker::open(database_path, database_defs_path)?,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceAdapter for SqliteStore {
    async fn load_cos_table(&self) -> Result<Vec<CoS>, PersistError> {
        let (tx, rx) = oneshot::channel();
        self.worker.send(Job::LoadCos(tx))?;
        Ok(rx.await.map_err(|_| Error::WorkerStopped)??)
    }

    async fn known_request_ids(&self) -> Result<Vec<ReqId>, PersistError> {
        let (tx, rx) = oneshot::channel();
        self.worker.send(Job::KnownIds(tx))?;
        Ok(rx.await.map_err(|_| Error::WorkerStopped)??)
    }

    async fn persist_request(&self, request: &Request) -> Result<(), PersistError> {
        let (tx, rx) = oneshot::channel();
        self.worker
            .send(Job::PersistRequest(Box::new(request.clone()), tx))?;
        Ok(rx.await.map_err(|_| Error::WorkerStopped)??)
    }

    async fn persist_response(&self, response: &Response) -> Result<(), PersistError> {
        let (tx, rx) = oneshot::channel();
        self.worker.send(Job::PersistResponse(*response, tx))?;
        Ok(rx.await.map_err(|_| Error::WorkerStopped)??)
    }

    async fn export_csv(&self, out_dir: &Path) -> Result<(), PersistError> {
        let (tx, rx) = oneshot::channel();
        self.worker
            .send(Job::ExportCsv(PathBuf::from(out_dir), tx))?;
        Ok(rx.await.map_err(|_| Error::WorkerStopped)??)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostmesh_core::{ReqState, Request};

    #[tokio::test]
    async fn fresh_memory_db_has_the_seeded_default_cos() {
        let store = SqliteStore::open(":memory:", None).unwrap();
        let table = store.load_cos_table().await.unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].id, 1);
    }

    #[tokio::test]
    async fn persisted_request_id_shows_up_in_known_ids() {
        let store = SqliteStore::open(":memory:", None).unwrap();
        let cos = store.load_cos_table().await.unwrap().remove(0);
        let req_id = ReqId::generate();
        let mut request = Request::new(req_id, cos, b"payload".to_vec());
        request.state = ReqState::Fail;

        store.persist_request(&request).await.unwrap();
        let known = store.known_request_ids().await.unwrap();
        assert!(known.contains(&req_id));
    }

    #[tokio::test]
    async fn export_csv_writes_one_file_per_table() {
        let store = SqliteStore::open(":memory:", None).unwrap();
        let dir = std::env::temp_dir().join(format!("hostmesh-store-test-{}", std::process::id()));
        store.export_csv(&dir).await.unwrap();
        for table in ["cos", "requests", "attempts", "responses"] {
            assert!(dir.join(format!("{table}.csv")).exists());
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
