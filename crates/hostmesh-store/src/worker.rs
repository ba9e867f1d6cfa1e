//! The single-writer persistence worker (spec §4.6, §9: "thread that reads
//! from a queue"). Owns the only `rusqlite::Connection` for the lifetime of
//! the process; every operation is a job enqueued over an `std::sync::mpsc`
//! channel and acknowledged back to the caller through a `oneshot`
//! completion signal — the canonical answer to using a storage engine that
//! is not safe under concurrent access from many callers.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Instant;

use rusqlite::{params, Connection};
use tokio::sync::oneshot;

use hostmesh_core::{Attempt, CoS, Request, Response};
use hostmesh_proto::ReqId;

use crate::error::Error;

const DEFAULT_SCHEMA: &str = include_str!("schema.sql");

pub enum Job {
    LoadCos(oneshot::Sender<Result<Vec<CoS>, Error>>),
    KnownIds(oneshot::Sender<Result<Vec<ReqId>, Error>>),
    PersistRequest(Box<Request>, oneshot::Sender<Result<(), Error>>),
    PersistResponse(Response, oneshot::Sender<Result<(), Error>>),
    ExportCsv(PathBuf, oneshot::Sender<Result<(), Error>>),
}

pub struct Worker {
    tx: std_mpsc::Sender<Job>,
    _thread: thread::JoinHandle<()>,
}

impl Worker {
    /// Opens (or creates) the database at `database_path`, running the
    /// schema script at `database_defs_path` if given, else the embedded
    /// default (spec §6's `DATABASE_DEFS_PATH`/default-fallback pair).
    /// `:memory:` is special-cased exactly as `catalog::create`/`open`
    /// special-case it.
    pub fn open(database_path: &str, database_defs_path: Option<&Path>) -> Result<Self, Error> {
        let conn = if database_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(database_path)?
        };

        let schema = match database_defs_path {
            Some(path) => std::fs::read_to_string(path).unwrap_or_else(|err| {
                tracing::warn!(?path, %err, "falling back to embedded default schema");
                DEFAULT_SCHEMA.to_string()
            }),
            None => DEFAULT_SCHEMA.to_string(),
        };
        conn.execute_batch(&schema)?;

        let (tx, rx) = std_mpsc::channel::<Job>();
        let thread = thread::Builder::new()
            .name("hostmesh-store".into())
            .spawn(move || run(conn, rx))
            .expect("failed to spawn persistence worker thread");

        Ok(Worker { tx, _thread: thread })
    }

    pub fn send(&self, job: Job) -> Result<(), Error> {
        self.tx.send(job).map_err(|_| Error::WorkerStopped)
    }
}

fn run(conn: Connection, rx: std_mpsc::Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        match job {
            Job::LoadCos(reply) => {
                let _ = reply.send(load_cos(&conn));
            }
            Job::KnownIds(reply) => {
                let _ = reply.send(known_ids(&conn));
            }
            Job::PersistRequest(request, reply) => {
                let _ = reply.send(persist_request(&conn, &request));
            }
            Job::PersistResponse(response, reply) => {
                let _ = reply.send(persist_response(&conn, &response));
            }
            Job::ExportCsv(dir, reply) => {
                let _ = reply.send(crate::csv_export::export_all(&conn, &dir));
            }
        }
    }
    tracing::info!("persistence worker thread exiting");
}

fn load_cos(conn: &Connection) -> Result<Vec<CoS>, Error> {
    let mut stmt = conn.prepare(
        "SELECT id, name, max_response_time, min_concurrent_users, min_requests_per_second, \
         min_bandwidth, max_delay, max_jitter, max_loss_rate, min_cpu, min_ram, min_disk \
         FROM cos ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(CoS {
            id: row.get(0)?,
            name: row.get(1)?,
            max_response_time: row.get(2)?,
            min_concurrent_users: row.get(3)?,
            min_requests_per_second: row.get(4)?,
            min_bandwidth: row.get(5)?,
            max_delay: row.get(6)?,
            max_jitter: row.get(7)?,
            max_loss_rate: row.get(8)?,
            min_cpu: row.get(9)?,
            min_ram: row.get(10)?,
            min_disk: row.get(11)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn known_ids(conn: &Connection) -> Result<Vec<ReqId>, Error> {
    let mut stmt = conn.prepare("SELECT id FROM requests")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut ids = Vec::new();
    for row in rows {
        let text = row?;
        if let Ok(id) = ReqId::from_str(&text) {
            ids.push(id);
        }
    }
    Ok(ids)
}

fn rel_secs(base: Option<Instant>, value: Option<Instant>) -> Option<f64> {
    let (base, value) = (base?, value?);
    Some(value.saturating_duration_since(base).as_secs_f64())
}

fn persist_request(conn: &Connection, request: &Request) -> Result<(), Error> {
    conn.execute(
        "INSERT OR REPLACE INTO requests (id, cos_id, host, state, late, data, result, saved_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))",
        params![
            request.id.as_str(),
            request.cos.id,
            request.host.map(|h| h.to_string()),
            request.state.as_str(),
            request.late,
            request.data,
            request.result,
        ],
    )?;

    for attempt in request.attempts.values() {
        persist_attempt(conn, request, attempt)?;
    }
    Ok(())
}

fn persist_attempt(conn: &Connection, request: &Request, attempt: &Attempt) -> Result<(), Error> {
    conn.execute(
        "INSERT OR REPLACE INTO attempts \
         (req_id, attempt_no, host, state, hreq_at, hres_at, rres_at, dres_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            attempt.req_id.as_str(),
            attempt.attempt_no,
            attempt.host.map(|h: SocketAddr| h.to_string()),
            attempt.state.as_str(),
            rel_secs(request.hreq_at, attempt.hreq_at),
            rel_secs(request.hreq_at, attempt.hres_at),
            rel_secs(request.hreq_at, attempt.rres_at),
            rel_secs(request.hreq_at, attempt.dres_at),
        ],
    )?;
    Ok(())
}

fn persist_response(conn: &Connection, response: &Response) -> Result<(), Error> {
    conn.execute(
        "INSERT INTO responses (req_id, attempt_no, host, cpu, ram, disk, timestamp) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            response.req_id.as_str(),
            response.attempt_no,
            response.host.to_string(),
            response.cpu,
            response.ram,
            response.disk,
            humantime_now(response.timestamp),
        ],
    )?;
    Ok(())
}

fn humantime_now(ts: std::time::SystemTime) -> String {
    match ts.duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => format!("{:.6}", d.as_secs_f64()),
        Err(_) => "0".to_string(),
    }
}
