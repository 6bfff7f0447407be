//! Error taxonomy, carried over verbatim from the original `ErrorCode` enum
//! (`Malloc`, `WifiInit`, `StartThread`, `OpenFile`, `SQLOpen`, `SQLExecute`,
//! `SQLParse`, `APIProtocolFormat`, `InputParameter`). `Success` has no
//! variant here — it is `Ok(())`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("memory pool exhausted")]
    Malloc,

    #[error("failed to bind or initialize UDP socket: {0}")]
    WifiInit(String),

    #[error("failed to start worker thread")]
    StartThread,

    #[error("failed to open file {path}: {source}")]
    OpenFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open database connection")]
    SqlOpen,

    #[error("database execute failed: {0}")]
    SqlExecute(#[from] sqlx::Error),

    #[error("malformed SQL-bound input: {0}")]
    SqlParse(String),

    #[error("malformed API envelope: {0}")]
    ApiProtocolFormat(String),

    #[error("invalid input parameter: {0}")]
    InputParameter(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
