#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("persistence worker is not running")]
    WorkerStopped,
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
