//! Startup error types.
//!
//! Only resource acquisition at startup is allowed to take the whole process
//! down. Per-connection failures live in [`crate::http::parser::ParseError`]
//! and [`crate::dispatch::HandlerError`] and never escape a worker.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort the supervisor before or while building the pool.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The listening address is taken or forbidden
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The pid file names a process that is still alive
    #[error("already running as pid {pid} (pid file {path})")]
    AlreadyRunning { pid: i32, path: PathBuf },

    /// fork(2) failed; no partial pool is kept
    #[error("failed to fork worker: {0}")]
    Fork(#[source] std::io::Error),

    /// Configuration could not be loaded or is inconsistent
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
