//! Observability hooks fired by the server around each call.

use tracing::{info, warn};

use crate::protocol::xdr::rpc::reply_body;
use crate::server::{CallInfo, ChainState};

/// Fired once per dispatched call after its chain has terminated.
#[derive(Debug)]
pub struct CompletionEvent<'a> {
    pub procedure: &'a str,
    pub call: &'a CallInfo,
    pub state: ChainState,
    /// Reply status written for the call, if any
    pub reply: Option<&'a reply_body>,
    /// Terminal error: the RPC error that was answered, or the fault
    pub error: Option<&'a anyhow::Error>,
}

/// Hooks installed once per server instance. Every method defaults to a no-op.
pub trait Observer: Send + Sync {
    fn rpc_start(&self, _call: &CallInfo) {}

    fn handler_start(&self, _call: &CallInfo, _handler: &str) {}

    fn handler_done(&self, _call: &CallInfo, _handler: &str) {}

    fn rpc_done(&self, _event: &CompletionEvent<'_>) {}
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Logs every completed call at `info`, faults at `warn`.
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl Observer for LoggingObserver {
    fn rpc_done(&self, event: &CompletionEvent<'_>) {
        match (event.state, event.error) {
            (ChainState::Faulted, Some(err)) => {
                warn!(call = %event.call, "{}: faulted: {:#}", event.procedure, err)
            }
            (state, Some(err)) => {
                let procedure = event.procedure;
                info!(call = %event.call, ?state, "{}: handled with error: {}", procedure, err)
            }
            (state, None) => info!(call = %event.call, ?state, "{}: handled", event.procedure),
        }
    }
}
