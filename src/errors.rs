use std::fmt;
use thiserror::Error;

/// Remote operation that a [`SyncError::Transfer`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOp {
    List,
    Download,
    Upload,
}

impl fmt::Display for TransferOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOp::List => write!(f, "list"),
            TransferOp::Download => write!(f, "download"),
            TransferOp::Upload => write!(f, "upload"),
        }
    }
}

/// Why an index record could not be interpreted.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("index record is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("index record is not a JSON object")]
    NotAnObject,

    #[error("index record has no '{0}' field")]
    MissingField(&'static str),

    #[error("index field '{field}' is not an integer (found {found})")]
    NotAnInteger { field: &'static str, found: String },
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("{0} requires an open session; call connect() first")]
    NotConnected(&'static str),

    #[error("Transfer error during {op} of '{name}': {reason}")]
    Transfer {
        op: TransferOp,
        name: String,
        reason: String,
    },

    #[error("Remote directory {0} contains no files")]
    EmptyDirectory(String),

    #[error("None of the {attempted} remote files could be downloaded")]
    NoFilesDownloaded { attempted: usize },

    #[error("Archive write error: {0}")]
    ArchiveWrite(String),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Upload of '{0}' was not confirmed by the remote side")]
    UnconfirmedWrite(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub(crate) fn transfer(op: TransferOp, name: impl Into<String>, reason: impl fmt::Display) -> Self {
        SyncError::Transfer {
            op,
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
