//! Typed faults raised by the codec, the framer, and the server and client engines.
//!
//! XDR primitives keep returning [`std::io::Result`] so they compose with
//! [`std::io::Read`] and [`std::io::Write`]. A typed fault raised deep inside
//! a `Deserialize` impl travels wrapped in an [`std::io::Error`] and is
//! recovered by `From<std::io::Error> for Error`.

use std::io;

use thiserror::Error;

use crate::protocol::rpc::RpcError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// Wire-level error that has its own reply encoding.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Last-fragment flag clear on a record header.
    #[error("multi-fragment records are not supported (fragment length {0})")]
    FragmentedRecord(u32),

    #[error("RPC record length {length} exceeds max {max}")]
    RecordTooLarge { length: usize, max: usize },

    #[error("RPC record of {0} bytes cannot carry an xid and message type")]
    RecordTooShort(usize),

    #[error("invalid message type {0}")]
    InvalidMessageType(u32),

    #[error("unsupported auth flavor {0}")]
    UnsupportedAuthFlavor(u32),

    #[error("invalid reply_stat {0}")]
    InvalidReplyStat(u32),

    #[error("invalid accept_stat {0}")]
    InvalidAcceptStat(u32),

    #[error("invalid reject_stat {0}")]
    InvalidRejectStat(u32),

    /// A reply arrived for an xid with no pending call.
    #[error("unsolicited message: no pending call for xid {0}")]
    UnsolicitedReply(u32),

    #[error("xid must be set before an error reply can be serialized")]
    MissingXid,

    #[error("message head already written")]
    HeadAlreadyWritten,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("invalid server url {0:?}")]
    InvalidUrl(String),
}

impl Error {
    /// True for faults after which the byte stream can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::FragmentedRecord(_)
                | Error::RecordTooLarge { .. }
                | Error::RecordTooShort(_)
                | Error::InvalidMessageType(_)
                | Error::ConnectionClosed
        )
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            if let Some(inner) = err.into_inner() {
                return match inner.downcast::<Error>() {
                    Ok(typed) => *typed,
                    Err(other) => Error::Io(io::Error::new(io::ErrorKind::InvalidData, other)),
                };
            }
            return Error::Io(io::Error::from(io::ErrorKind::InvalidData));
        }
        Error::Io(err)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
