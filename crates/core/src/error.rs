use thiserror::Error;

/// Error kinds surfaced by the hub. Filter rejections are deliberately *not*
/// represented here — see `RejectReason`/`PushResult` in `hub-tree` — only
/// structural and I/O failures are.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("wrong kind: {0}")]
    WrongKind(String),

    #[error("mismatch: {0}")]
    Mismatch(String),

    #[error("malformed: {0}")]
    Malformed(String),

    #[error("overflow: {0}")]
    Overflow(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("underflow: {0}")]
    Underflow(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("canceled")]
    Canceled,

    #[error("fatal: {0}")]
    Fatal(String),
}

pub type HubResult<T> = Result<T, HubError>;
