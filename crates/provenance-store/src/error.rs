use provenance_engine::OperationId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid log store JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown operation log {0}")]
    UnknownLog(OperationId),
    #[error("unsupported log store format version {0}")]
    UnsupportedVersion(u32),
    #[error("log store has no persist path configured")]
    NoPersistPath,
}
