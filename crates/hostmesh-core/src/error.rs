//! Top-level error type for `hostmesh-core` (spec §7). The only user-visible
//! failure is `send_request` returning `Error::Failed`; everything else
//! (transient unreachability, reservation races, cross-host late replies,
//! malformed packets) is recovered internally and never reaches this type.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::Error),
    #[error("unknown class of service id {0}")]
    UnknownCos(u32),
    #[error("request exhausted all retries with no result")]
    Failed,
}
