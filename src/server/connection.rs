//! Per-connection processing: validation and dispatch of incoming calls.
//!
//! Validation runs synchronously on the socket task, in this order, and the
//! first failure is answered directly without touching application code:
//!
//! 1. `rpcvers` must be 2 (denied, RPC_MISMATCH)
//! 2. `prog` must be the served program (PROG_UNAVAIL)
//! 3. `vers` must be supported (PROG_MISMATCH with the supported bounds)
//! 4. procedure 0 is always answered with an empty SUCCESS
//! 5. the procedure must be registered (PROC_UNAVAIL)
//!
//! A call whose credential or verifier does not decode is answered with
//! AUTH_ERROR (AUTH_BADCRED) once steps 1 to 3 have passed on its fixed
//! fields.
//!
//! Accepted calls run on their own task so a slow chain never holds up the
//! framing of later calls on the same connection. Replies may therefore go
//! out in a different order than the calls came in.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use futures::FutureExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, trace, warn};
use tracing_attributes::instrument;

use crate::error::Error;
use crate::protocol::rpc::{
    is_supported_rpc_version, pump, Parsed, RecordParser, RecordSender, RpcCall, RpcError,
    RpcMessage, RpcReply,
};
use crate::protocol::xdr::rpc::{msg_type, RPC_VERSION};
use crate::server::chain::ChainOutcome;
use crate::server::procedure::{Dispatch, ProcedureTable};
use crate::server::{
    CallInfo, ChainState, CompletionEvent, FaultHandler, Middleware, Observer, ServerConfig,
};

/// Server state shared read-only by every connection.
pub(crate) struct ServerShared {
    pub config: ServerConfig,
    pub procedures: ProcedureTable,
    pub middleware: Arc<[Arc<dyn Middleware>]>,
    pub observer: Arc<dyn Observer>,
    pub fault_handler: Option<FaultHandler>,
}

/// Where a call came in.
#[derive(Clone)]
struct Peer {
    sink: RecordSender,
    client_addr: Option<SocketAddr>,
    local_port: u16,
}

/// Runs one accepted connection until it closes.
#[instrument(skip_all, fields(peer = ?socket.peer_addr().ok()))]
pub(crate) async fn process_socket(
    mut socket: TcpStream,
    shared: Arc<ServerShared>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Error> {
    let (sink, mut outbound) = RecordSender::channel();
    let peer = Peer {
        sink,
        client_addr: socket.peer_addr().ok(),
        local_port: socket.local_addr().map(|addr| addr.port()).unwrap_or(0),
    };
    let mut parser = RecordParser::new(shared.config.max_record_length);

    let result = pump(&mut socket, &mut parser, &mut outbound, &mut shutdown, |record| {
        shared.on_record(record, &peer)
    })
    .await;
    match &result {
        Ok(()) => debug!("Connection closed"),
        Err(e) => warn!("Connection closed on error: {}", e),
    }
    result
}

impl ServerShared {
    fn on_record(self: &Arc<Self>, record: Parsed, peer: &Peer) -> Result<(), Error> {
        match record {
            Parsed::Message(RpcMessage::Call(call)) => self.dispatch(call, peer),
            Parsed::Message(RpcMessage::Reply(reply)) => {
                warn!("Unexpectedly received a Reply instead of a Call: {}", reply);
                Ok(())
            }
            Parsed::Rejected { xid, kind: msg_type::CALL, head: Some(head), error } => {
                let err = match self.check_version(head.rpcvers, head.prog, head.vers) {
                    Some(err) => err,
                    None => {
                        debug!("xid {}: bad credentials: {}", xid, error);
                        RpcError::auth().with_cause(error)
                    }
                };
                peer.sink.send(err.with_xid(xid).to_bytes()?)
            }
            Parsed::Rejected { xid, error, .. } => {
                warn!("xid {}: undecodable RPC header: {}", xid, error);
                Err(error)
            }
        }
    }

    /// Checks the RPC version, program and program version.
    fn check_version(&self, rpcvers: u32, prog: u32, vers: u32) -> Option<RpcError> {
        let config = &self.config;
        if !is_supported_rpc_version(rpcvers) {
            warn!("Invalid RPC version {} != {}", rpcvers, RPC_VERSION);
            Some(RpcError::rpc_mismatch())
        } else if prog != config.program {
            warn!("Unknown RPC Program number {} != {}", prog, config.program);
            Some(RpcError::program_unavailable())
        } else if !config.supports_version(vers) {
            warn!("Unsupported program version {} (supported {:?})", vers, config.versions);
            let (low, high) = config.version_bounds();
            Some(RpcError::program_mismatch(low, high))
        } else {
            None
        }
    }

    /// Validates `call` and either answers it or schedules its chain.
    fn dispatch(self: &Arc<Self>, call: RpcCall, peer: &Peer) -> Result<(), Error> {
        let config = &self.config;
        trace!("call received: {}", call);

        let rejection = match self.check_version(call.rpcvers(), call.prog(), call.vers()) {
            Some(err) => Some(err),
            None if call.proc() == 0 => {
                trace!("NULL procedure, xid {}", call.xid);
                return peer.sink.send(RpcReply::success(call.xid).send()?);
            }
            None if self.procedures.get(call.proc()).is_none() => {
                warn!("Unknown procedure {} for program {}", call.proc(), config.program);
                Some(RpcError::procedure_unavailable())
            }
            None => None,
        };

        if let Some(err) = rejection {
            return peer.sink.send(err.with_xid(call.xid).to_bytes()?);
        }

        let Some(procedure) = self.procedures.get(call.proc()) else {
            return Ok(());
        };
        let info = CallInfo::new(
            &config.name,
            &procedure.name,
            &call,
            peer.client_addr,
            peer.local_port,
        );
        self.observer.rpc_start(&info);

        let shared = Arc::clone(self);
        let sink = peer.sink.clone();
        tokio::spawn(async move { shared.run(call, info, sink).await });
        Ok(())
    }

    #[instrument(skip_all, fields(procedure = %info.procedure, xid = info.xid))]
    async fn run(self: Arc<Self>, call: RpcCall, info: CallInfo, sink: RecordSender) {
        let Some(procedure) = self.procedures.get(info.proc) else {
            return;
        };
        let dispatch = Dispatch {
            call,
            info: info.clone(),
            sink: sink.clone(),
            middleware: Arc::clone(&self.middleware),
            observer: Arc::clone(&self.observer),
        };

        let outcome = match AssertUnwindSafe(procedure.dispatch(dispatch)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => ChainOutcome::faulted(
                anyhow!("handler panicked: {}", panic_message(panic.as_ref())),
                None,
            ),
        };

        if outcome.state == ChainState::Faulted {
            match (&self.fault_handler, &outcome.error) {
                (Some(handler), Some(err)) => handler(&info, err),
                _ => {
                    warn!("Uncaught fault in {}, closing connection", info);
                    sink.close();
                }
            }
        }

        self.observer.rpc_done(&CompletionEvent {
            procedure: &info.procedure,
            call: &info,
            state: outcome.state,
            reply: outcome.reply.as_ref(),
            error: outcome.error.as_ref(),
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic payload"
    }
}
