use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Closed set of failure kinds. Construction-time failures surface as
/// `ProcessOpen`, `Injection` or `Initialization` depending on the stage
/// reached; run-time failures surface as `Execution` wrapping the cause and
/// leave the session usable; cleanup never raises any of these.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open process {pid}: {source}")]
    ProcessOpen {
        pid: u32,
        #[source]
        source: windows::core::Error,
    },

    #[error("injection failed: {0}")]
    Injection(String),

    #[error("remote runtime initialization failed: {0}")]
    Initialization(String),

    #[error("cannot resolve export '{symbol}' in {}: {reason}", .library.display())]
    SymbolNotFound {
        symbol: String,
        library: PathBuf,
        reason: String,
    },

    #[error("remote call failed: {0}")]
    RemoteCall(String),

    #[error("remote call timed out after {0:?}; the remote thread may still be running")]
    RemoteCallTimeout(Duration),

    #[error("operation requires the {required} state, session is {actual}")]
    InvalidState {
        required: &'static str,
        actual: &'static str,
    },

    #[error("code execution failed")]
    Execution(#[source] Box<Error>),
}

impl Error {
    pub(crate) fn symbol(library: &Path, symbol: &str, reason: impl Into<String>) -> Self {
        Error::SymbolNotFound {
            symbol: symbol.to_owned(),
            library: library.to_path_buf(),
            reason: reason.into(),
        }
    }
}
