//! Protocol-level failures that have a defined RPC reply encoding.
//!
//! | Kind                     | reply_stat  | accept/reject_stat | Extra       |
//! |--------------------------|-------------|--------------------|-------------|
//! | `RpcMismatch`            | denied(1)   | rpc_mismatch(0)    | low, high   |
//! | `Auth`                   | denied(1)   | auth_error(1)      | auth_stat   |
//! | `ProgramUnavailable`     | accepted(0) | prog_unavail(1)    |             |
//! | `ProgramMismatch`        | accepted(0) | prog_mismatch(2)   | low, high   |
//! | `ProcedureUnavailable`   | accepted(0) | proc_unavail(3)    |             |
//! | `GarbageArguments`       | accepted(0) | garbage_args(4)    |             |

use std::error::Error as StdError;
use std::fmt;

use crate::error::Error;
use crate::protocol::rpc::RpcReply;
use crate::protocol::xdr::rpc::{
    accept_body, auth_stat, mismatch_info, rejected_reply, reply_body, RPC_VERSION,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RpcErrorKind {
    RpcMismatch { low: u32, high: u32 },
    Auth(auth_stat),
    ProgramUnavailable,
    ProgramMismatch { low: u32, high: u32 },
    ProcedureUnavailable,
    GarbageArguments,
}

impl RpcErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            RpcErrorKind::RpcMismatch { .. } => "RpcMismatchError",
            RpcErrorKind::Auth(_) => "RpcAuthError",
            RpcErrorKind::ProgramUnavailable => "RpcProgramUnavailableError",
            RpcErrorKind::ProgramMismatch { .. } => "RpcProgramMismatchError",
            RpcErrorKind::ProcedureUnavailable => "RpcProcedureUnavailableError",
            RpcErrorKind::GarbageArguments => "RpcGarbageArgumentsError",
        }
    }

    /// Reply body carrying this error, independent of any payload.
    pub fn reply_body(&self) -> reply_body {
        match *self {
            RpcErrorKind::RpcMismatch { low, high } => {
                reply_body::MSG_DENIED(rejected_reply::RPC_MISMATCH(mismatch_info { low, high }))
            }
            RpcErrorKind::Auth(stat) => reply_body::MSG_DENIED(rejected_reply::AUTH_ERROR(stat)),
            RpcErrorKind::ProgramUnavailable => reply_body::accepted(accept_body::PROG_UNAVAIL),
            RpcErrorKind::ProgramMismatch { low, high } => {
                reply_body::accepted(accept_body::PROG_MISMATCH(mismatch_info { low, high }))
            }
            RpcErrorKind::ProcedureUnavailable => reply_body::accepted(accept_body::PROC_UNAVAIL),
            RpcErrorKind::GarbageArguments => reply_body::accepted(accept_body::GARBAGE_ARGS),
        }
    }

    /// Classifies a decoded reply body. `None` means SUCCESS.
    pub fn from_reply_body(body: &reply_body) -> Option<RpcErrorKind> {
        match body {
            reply_body::MSG_ACCEPTED(accepted) => match accepted.reply_data {
                accept_body::SUCCESS => None,
                accept_body::PROG_UNAVAIL => Some(RpcErrorKind::ProgramUnavailable),
                accept_body::PROG_MISMATCH(info) => {
                    Some(RpcErrorKind::ProgramMismatch { low: info.low, high: info.high })
                }
                accept_body::PROC_UNAVAIL => Some(RpcErrorKind::ProcedureUnavailable),
                accept_body::GARBAGE_ARGS => Some(RpcErrorKind::GarbageArguments),
            },
            reply_body::MSG_DENIED(rejected_reply::RPC_MISMATCH(info)) => {
                Some(RpcErrorKind::RpcMismatch { low: info.low, high: info.high })
            }
            reply_body::MSG_DENIED(rejected_reply::AUTH_ERROR(stat)) => {
                Some(RpcErrorKind::Auth(*stat))
            }
        }
    }
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcErrorKind::RpcMismatch { low, high } => {
                write!(f, "RPC version mismatch (supported {low}..={high})")
            }
            RpcErrorKind::Auth(stat) => write!(f, "authentication error ({stat:?})"),
            RpcErrorKind::ProgramUnavailable => write!(f, "program unavailable"),
            RpcErrorKind::ProgramMismatch { low, high } => {
                write!(f, "program version mismatch (supported {low}..={high})")
            }
            RpcErrorKind::ProcedureUnavailable => write!(f, "procedure unavailable"),
            RpcErrorKind::GarbageArguments => write!(f, "garbage arguments"),
        }
    }
}

/// A wire-level RPC error, always answered to one specific call.
#[derive(Debug)]
pub struct RpcError {
    kind: RpcErrorKind,
    xid: Option<u32>,
    cause: Option<Box<dyn StdError + Send + Sync>>,
}

impl RpcError {
    pub fn new(kind: RpcErrorKind) -> Self {
        Self { kind, xid: None, cause: None }
    }

    pub fn rpc_mismatch() -> Self {
        Self::new(RpcErrorKind::RpcMismatch { low: RPC_VERSION, high: RPC_VERSION })
    }

    pub fn auth() -> Self {
        Self::new(RpcErrorKind::Auth(auth_stat::AUTH_BADCRED))
    }

    pub fn program_unavailable() -> Self {
        Self::new(RpcErrorKind::ProgramUnavailable)
    }

    pub fn program_mismatch(low: u32, high: u32) -> Self {
        Self::new(RpcErrorKind::ProgramMismatch { low, high })
    }

    pub fn procedure_unavailable() -> Self {
        Self::new(RpcErrorKind::ProcedureUnavailable)
    }

    pub fn garbage_arguments() -> Self {
        Self::new(RpcErrorKind::GarbageArguments)
    }

    pub fn with_xid(mut self, xid: u32) -> Self {
        self.xid = Some(xid);
        self
    }

    pub fn with_cause(mut self, cause: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn kind(&self) -> RpcErrorKind {
        self.kind
    }

    pub fn xid(&self) -> Option<u32> {
        self.xid
    }

    pub fn set_xid(&mut self, xid: u32) {
        self.xid = Some(xid);
    }

    /// Updates the advertised bounds of a mismatch error. No-op for other kinds.
    pub fn set_bounds(&mut self, new_low: u32, new_high: u32) {
        match &mut self.kind {
            RpcErrorKind::RpcMismatch { low, high }
            | RpcErrorKind::ProgramMismatch { low, high } => {
                *low = new_low;
                *high = new_high;
            }
            _ => {}
        }
    }

    /// Builds the reply for this error. Fails if no xid was attached.
    pub fn to_reply(&self) -> Result<RpcReply, Error> {
        let xid = self.xid.ok_or(Error::MissingXid)?;
        Ok(RpcReply::new(xid, self.kind.reply_body()))
    }

    /// Complete record (record mark included) ready for the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        self.to_reply()?.send()
    }
}

impl From<RpcErrorKind> for RpcError {
    fn from(kind: RpcErrorKind) -> Self {
        RpcError::new(kind)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.kind)?;
        if let Some(xid) = self.xid {
            write!(f, " (xid={xid})")?;
        }
        Ok(())
    }
}

impl StdError for RpcError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|cause| cause.as_ref() as &(dyn StdError + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializing_without_xid_fails() {
        let err = RpcError::procedure_unavailable();
        assert!(matches!(err.to_bytes(), Err(Error::MissingXid)));
    }

    #[test]
    fn cause_is_exposed_as_source() {
        let err = RpcError::garbage_arguments()
            .with_xid(9)
            .with_cause(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "RpcGarbageArgumentsError: garbage arguments (xid=9)");
    }

    #[test]
    fn bounds_are_settable() {
        let mut err = RpcError::program_mismatch(0, 0);
        err.set_bounds(3, 4);
        assert_eq!(err.kind(), RpcErrorKind::ProgramMismatch { low: 3, high: 4 });
    }
}
