//! Handler chain driver.
//!
//! Runs middleware, then the procedure's handlers, strictly in order, and
//! stops at the first handler that aborts, answers with an error, or faults.
//! Reaching the end of the chain never writes a reply on its own: a chain
//! that never called [`Reply::send`] ends in [`ChainState::Pending`].

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::protocol::rpc::{RecordSender, RpcError};
use crate::protocol::xdr::rpc::reply_body;
use crate::protocol::xdr::{Deserialize, Serialize};
use crate::server::procedure::Dispatch;
use crate::server::{Call, ChainState, Handler, Next, Reply};

pub(crate) struct ChainOutcome {
    pub state: ChainState,
    pub reply: Option<reply_body>,
    pub error: Option<anyhow::Error>,
}

impl ChainOutcome {
    pub fn faulted(error: anyhow::Error, reply: Option<reply_body>) -> Self {
        Self { state: ChainState::Faulted, reply, error: Some(error) }
    }
}

/// Writes `err` as the whole answer to a call that never reached a handler.
fn answer_with_error(sink: &RecordSender, err: RpcError) -> ChainOutcome {
    let written = err.to_bytes().and_then(|record| sink.send(record));
    match written {
        Ok(()) => ChainOutcome {
            state: ChainState::RepliedError,
            reply: Some(err.kind().reply_body()),
            error: Some(anyhow::Error::new(err)),
        },
        Err(e) => ChainOutcome::faulted(anyhow::Error::new(e), None),
    }
}

pub(crate) async fn execute<C, R>(
    handlers: &[Arc<dyn Handler<C, R>>],
    dispatch: Dispatch,
) -> ChainOutcome
where
    C: Deserialize + Default + Send + 'static,
    R: Serialize + Default + Send + 'static,
{
    let Dispatch { call, info, sink, middleware, observer } = dispatch;
    let xid = call.xid;

    let args = match call.decode_args::<C>() {
        Ok(args) => args,
        Err(e) => {
            debug!("{}: arguments failed to decode: {}", info, e);
            let err = RpcError::garbage_arguments().with_xid(xid).with_cause(e);
            return answer_with_error(&sink, err);
        }
    };

    let mut call = Call::new(info, args, call);
    let mut reply = Reply::new(xid, R::default(), sink);

    for m in middleware.iter() {
        observer.handler_start(&call.info, m.name());
        trace!("{}: running middleware {}", call.info, m.name());
        let step = m.handle(&call.info).await;
        observer.handler_done(&call.info, m.name());
        if let Some(outcome) = settle(step, &mut reply) {
            return outcome;
        }
    }

    for h in handlers {
        observer.handler_start(&call.info, h.name());
        trace!("{}: running handler {}", call.info, h.name());
        let step = h.handle(&mut call, &mut reply).await;
        observer.handler_done(&call.info, h.name());
        if let Some(outcome) = settle(step, &mut reply) {
            return outcome;
        }
    }

    ChainOutcome { state: reply.state(), reply: reply.body().cloned(), error: None }
}

/// Maps one handler result to a terminal outcome, or `None` to keep going.
fn settle<R>(step: anyhow::Result<Next>, reply: &mut Reply<R>) -> Option<ChainOutcome> {
    match step {
        Ok(Next::Continue) => None,
        Ok(Next::Abort) => Some(ChainOutcome {
            state: ChainState::Aborted,
            reply: reply.body().cloned(),
            error: None,
        }),
        Ok(Next::Error(err)) => Some(reply_error(reply, err)),
        Err(e) => match e.downcast::<RpcError>() {
            Ok(err) => Some(reply_error(reply, err)),
            Err(e) => Some(ChainOutcome::faulted(e, reply.body().cloned())),
        },
    }
}

fn reply_error<R>(reply: &mut Reply<R>, err: RpcError) -> ChainOutcome {
    let err = err.with_xid(reply.xid());
    match reply.send_error(&err) {
        Ok(()) => ChainOutcome {
            state: ChainState::RepliedError,
            reply: reply.body().cloned(),
            error: Some(anyhow::Error::new(err)),
        },
        Err(Error::HeadAlreadyWritten) => {
            warn!("xid {}: reply already written, dropping {}", reply.xid(), err);
            ChainOutcome {
                state: reply.state(),
                reply: reply.body().cloned(),
                error: Some(anyhow::Error::new(err)),
            }
        }
        Err(e) => ChainOutcome::faulted(
            anyhow::Error::new(e).context(format!("writing {err}")),
            reply.body().cloned(),
        ),
    }
}
