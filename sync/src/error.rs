//! Unified error handling for the sync binary.

use thiserror::Error;

/// Run-level error type.
///
/// A failure of a single sobject never aborts the whole job; these surface
/// per-task and are logged by the worker that hit them. Only configuration
/// and connection failures are fatal for the run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration not found: {0}")]
    ConfigMissing(String),

    #[error("config.json already exists for {0}; remove file and tables manually to start over")]
    AlreadyInitialized(String),

    #[error("unsupported database vendor: {0}")]
    UnsupportedVendor(String),

    #[error("remote authentication failed: {0}")]
    AuthFailure(String),

    #[error("database connection failed: {0}")]
    ConnectFailure(#[source] sqlx::Error),

    #[error(transparent)]
    Schema(#[from] gurglefish_engine::Error),

    #[error("query result too large for the REST API")]
    QueryTooLarge,

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("remote transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("remote returned {status} for {url}: {body}")]
    RemoteStatus {
        status: u16,
        url: String,
        body: String,
    },

    #[error("bulk job did not start within {0} seconds")]
    BulkTimeout(u64),

    #[error("record in {0} has no id")]
    RowWithoutId(String),

    #[error("table {0} is not empty; bulk load requires an empty table")]
    TableNotEmpty(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl SyncError {
    /// Process exit code: 0 is success, 1 a configuration error, 2 anything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::ConfigMissing(_)
            | SyncError::AlreadyInitialized(_)
            | SyncError::UnsupportedVendor(_) => 1,
            _ => 2,
        }
    }
}

/// Result type alias for the sync binary.
pub type Result<T> = std::result::Result<T, SyncError>;
