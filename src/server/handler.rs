//! Handler chain building blocks.
//!
//! A registered procedure runs an ordered list of handlers. Each handler
//! receives the decoded call and the pending reply and tells the driver how
//! to continue by returning a [`Next`]. Middleware runs ahead of every
//! procedure's handlers and only sees the call header.

use async_trait::async_trait;

use crate::error::Error;
use crate::protocol::rpc::{RecordSender, RpcCall, RpcError, RpcReply};
use crate::protocol::xdr::rpc::reply_body;
use crate::protocol::xdr::Serialize;
use crate::server::CallInfo;

/// What the chain driver does after a handler returns.
#[derive(Debug)]
pub enum Next {
    /// Run the following handler.
    Continue,
    /// Stop without writing anything.
    Abort,
    /// Stop and answer the call with this error.
    Error(RpcError),
}

impl From<RpcError> for Next {
    fn from(err: RpcError) -> Self {
        Next::Error(err)
    }
}

/// Terminal state of a handler chain.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChainState {
    /// Chain ran to the end without a reply being written
    Pending,
    RepliedSuccess,
    RepliedError,
    /// A handler returned [`Next::Abort`]
    Aborted,
    /// A handler failed with something other than an [`RpcError`], or panicked
    Faulted,
}

/// An incoming call with its arguments decoded into `C`.
#[derive(Debug)]
pub struct Call<C> {
    pub info: CallInfo,
    pub args: C,
    message: RpcCall,
}

impl<C> Call<C> {
    pub(crate) fn new(info: CallInfo, args: C, message: RpcCall) -> Self {
        Self { info, args, message }
    }

    pub fn xid(&self) -> u32 {
        self.info.xid
    }

    pub fn message(&self) -> &RpcCall {
        &self.message
    }
}

/// The reply to one call. Written to the connection at most once.
#[derive(Debug)]
pub struct Reply<R> {
    /// Results encoded after the header on [`Reply::send`]
    pub result: R,
    xid: u32,
    sink: RecordSender,
    state: ChainState,
    body: Option<reply_body>,
}

impl<R> Reply<R> {
    pub(crate) fn new(xid: u32, result: R, sink: RecordSender) -> Self {
        Self { result, xid, sink, state: ChainState::Pending, body: None }
    }

    pub fn xid(&self) -> u32 {
        self.xid
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn is_sent(&self) -> bool {
        self.body.is_some()
    }

    /// Reply status that was written, if any.
    pub fn body(&self) -> Option<&reply_body> {
        self.body.as_ref()
    }

    /// Answers the call with `err` instead of results.
    pub fn send_error(&mut self, err: &RpcError) -> Result<(), Error> {
        if self.is_sent() {
            return Err(Error::HeadAlreadyWritten);
        }
        let mut reply = RpcError::new(err.kind()).with_xid(self.xid).to_reply()?;
        self.sink.send(reply.send()?)?;
        self.body = Some(reply.body);
        self.state = ChainState::RepliedError;
        Ok(())
    }
}

impl<R: Serialize> Reply<R> {
    /// Writes a SUCCESS reply carrying `self.result`.
    pub fn send(&mut self) -> Result<(), Error> {
        if self.is_sent() {
            return Err(Error::HeadAlreadyWritten);
        }
        let mut reply = RpcReply::success(self.xid);
        reply.set_result(&self.result)?;
        self.sink.send(reply.send()?)?;
        self.body = Some(reply.body);
        self.state = ChainState::RepliedSuccess;
        Ok(())
    }
}

/// One step of a procedure's handler chain.
///
/// Returning `Err` whose root is an [`RpcError`] behaves like
/// `Ok(Next::Error(..))`. Any other `Err` is an uncaught fault.
#[async_trait]
pub trait Handler<C, R>: Send + Sync
where
    C: Send + 'static,
    R: Send + 'static,
{
    /// Name reported to the observer.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn handle(&self, call: &mut Call<C>, reply: &mut Reply<R>) -> anyhow::Result<Next>;
}

/// A handler shared by every registered procedure, run before the
/// procedure's own chain.
///
/// Middleware sees only the untyped [`CallInfo`]. It can continue, abort or
/// answer with an [`RpcError`], but success replies are written by the
/// procedure's typed handlers.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn handle(&self, call: &CallInfo) -> anyhow::Result<Next>;
}
