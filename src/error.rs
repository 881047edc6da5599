use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything the object database can fail with.
///
/// The library never prints; callers decide what any of these mean for exit
/// codes or display.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A format invariant was violated: bad magic, checksum mismatch,
    /// truncated field, malformed header.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// Object or ref absent from every configured store.
    #[error("not found: {0}")]
    NotFound(String),

    /// A short hex prefix matched more than one loose object.
    #[error("ambiguous object prefix: {0}")]
    Ambiguous(String),

    /// Known feature this client deliberately does not implement
    /// (large pack offsets, ref-delta bases, index v4, packed-refs).
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Use of an object handle after it was released.
    #[error("object reader already released")]
    Closed,
}

impl Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Error {
        Error::Corrupt(msg.into())
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Error {
        Error::NotFound(what.into())
    }
}
