//! Client correlation engine.
//!
//! One [`RpcClient`] owns one TCP connection. Calls are written as soon as
//! they are made and their replies are matched back by xid, so any number of
//! calls can be in flight at once and replies may arrive in any order.
//!
//! Each call completes exactly once: with its reply, with the typed error the
//! reply status maps to, or with [`Error::ConnectionClosed`] if the
//! connection goes away first.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};
use tracing_attributes::instrument;

use crate::error::Error;
use crate::protocol::rpc::{
    pump, Outbound, Parsed, RecordParser, RecordSender, RpcCall, RpcMessage, RpcReply,
    XidGenerator, DEFAULT_MAX_RECORD_LENGTH,
};
use crate::protocol::xdr::rpc::RPC_VERSION;
use crate::protocol::xdr::{Deserialize, Serialize};

/// Program, version and server address a client talks to.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub program: u32,
    pub version: u32,
    /// `tcp://host:port` or `host:port`
    pub url: String,
    pub max_record_length: usize,
}

impl ClientConfig {
    pub fn new(program: u32, version: u32, url: impl Into<String>) -> Self {
        Self { program, version, url: url.into(), max_record_length: DEFAULT_MAX_RECORD_LENGTH }
    }

    pub fn with_max_record_length(mut self, max_record_length: usize) -> Self {
        self.max_record_length = max_record_length;
        self
    }

    /// The `host:port` part of the url.
    pub fn address(&self) -> Result<&str, Error> {
        let url = self.url.strip_prefix("tcp://").unwrap_or(&self.url);
        let url = url.trim_end_matches('/');
        if url.contains("://") {
            return Err(Error::InvalidUrl(self.url.clone()));
        }
        match url.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(url),
            _ => Err(Error::InvalidUrl(self.url.clone())),
        }
    }
}

/// Connection-level events a client reports. Every method defaults to a no-op.
pub trait ClientObserver: Send + Sync {
    /// Faults that belong to no pending call, such as unsolicited replies.
    fn connection_fault(&self, _err: &Error) {}

    fn reply_received(&self, _reply: &RpcReply) {}
}

#[derive(Debug, Default)]
pub struct NoopClientObserver;

impl ClientObserver for NoopClientObserver {}

type Callback = Box<dyn FnOnce(Result<RpcReply, Error>) + Send>;

/// Runs `callback` on the connection task. A panicking callback is logged and
/// does not stop the task, so the remaining calls still complete.
fn complete(xid: u32, callback: Callback, result: Result<RpcReply, Error>) {
    if panic::catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
        error!("xid {}: reply callback panicked", xid);
    }
}

#[derive(Default)]
struct PendingTable {
    calls: HashMap<u32, Callback>,
    closed: bool,
}

#[derive(Clone, Default)]
struct Pending(Arc<Mutex<PendingTable>>);

impl Pending {
    fn lock(&self) -> MutexGuard<'_, PendingTable> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, xid: u32) -> Option<Callback> {
        self.lock().calls.remove(&xid)
    }

    /// Marks the table closed and fails everything still waiting.
    fn fail_all(&self) {
        let drained: Vec<(u32, Callback)> = {
            let mut table = self.lock();
            table.closed = true;
            table.calls.drain().collect()
        };
        for (xid, callback) in drained {
            debug!("xid {}: failing pending call, connection closed", xid);
            complete(xid, callback, Err(Error::ConnectionClosed));
        }
    }

    fn len(&self) -> usize {
        self.lock().calls.len()
    }
}

/// A connected RPC client for one program version.
pub struct RpcClient {
    config: ClientConfig,
    peer: SocketAddr,
    xids: XidGenerator,
    pending: Pending,
    sink: RecordSender,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RpcClient {
    pub async fn connect(config: ClientConfig) -> Result<Self, Error> {
        Self::connect_with_observer(config, Arc::new(NoopClientObserver)).await
    }

    pub async fn connect_with_observer(
        config: ClientConfig,
        observer: Arc<dyn ClientObserver>,
    ) -> Result<Self, Error> {
        let socket = TcpStream::connect(config.address()?).await?;
        let peer = socket.peer_addr()?;
        debug!("Connected to {}", peer);

        let (sink, outbound) = RecordSender::channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let pending = Pending::default();
        let parser = RecordParser::new(config.max_record_length);
        let task = tokio::spawn(run_connection(
            socket,
            parser,
            outbound,
            shutdown_rx,
            pending.clone(),
            observer,
        ));

        Ok(Self { config, peer, xids: XidGenerator::new(), pending, sink, shutdown, task })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Calls still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Sends `call` and returns its xid without waiting. `callback` runs
    /// exactly once, on the connection task, when the call completes.
    pub fn call_with<F>(&self, mut call: RpcCall, callback: F) -> u32
    where
        F: FnOnce(Result<RpcReply, Error>) + Send + 'static,
    {
        call.body.rpcvers = RPC_VERSION;
        call.body.prog = self.config.program;
        call.body.vers = self.config.version;

        let mut table = self.pending.lock();
        let xid = loop {
            let xid = self.xids.next_xid();
            if !table.calls.contains_key(&xid) {
                break xid;
            }
        };
        call.xid = xid;

        if table.closed {
            drop(table);
            callback(Err(Error::ConnectionClosed));
            return xid;
        }
        let record = match call.send() {
            Ok(record) => record,
            Err(e) => {
                drop(table);
                callback(Err(e));
                return xid;
            }
        };
        table.calls.insert(xid, Box::new(callback));
        drop(table);

        trace!("Sending {}", call);
        if let Err(e) = self.sink.send(record) {
            if let Some(callback) = self.pending.take(xid) {
                callback(Err(e));
            }
        }
        xid
    }

    /// Sends `call` and waits for its reply.
    pub async fn call(&self, call: RpcCall) -> Result<RpcReply, Error> {
        let (tx, rx) = oneshot::channel();
        self.call_with(call, move |result| {
            let _ = tx.send(result);
        });
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Encodes `args`, calls `proc` and decodes the results as `T`.
    pub async fn call_proc<A, T>(&self, proc: u32, args: &A) -> Result<T, Error>
    where
        A: Serialize + ?Sized,
        T: Deserialize + Default,
    {
        let call = RpcCall::new(proc).with_args(args)?;
        self.call(call).await?.decode_result::<T>()
    }

    /// Calls the NULL procedure.
    pub async fn ping(&self) -> Result<(), Error> {
        self.call(RpcCall::new(0)).await.map(|_| ())
    }

    /// Closes the connection. Calls still pending fail with
    /// [`Error::ConnectionClosed`].
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("config", &self.config)
            .field("peer", &self.peer)
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}

impl fmt::Display for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[object RpcClient <host={}, port={}>, program={}, version={}]",
            self.peer.ip(),
            self.peer.port(),
            self.config.program,
            self.config.version
        )
    }
}

#[instrument(skip_all, fields(peer = ?socket.peer_addr().ok()))]
async fn run_connection(
    mut socket: TcpStream,
    mut parser: RecordParser,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    mut shutdown: watch::Receiver<bool>,
    pending: Pending,
    observer: Arc<dyn ClientObserver>,
) {
    let _fail_pending = FailPending(pending.clone());
    let result = pump(&mut socket, &mut parser, &mut outbound, &mut shutdown, |record| {
        on_record(record, &pending, observer.as_ref());
        Ok(())
    })
    .await;
    if let Err(e) = result {
        warn!("Connection failed: {}", e);
        observer.connection_fault(&e);
    }
}

/// Fails every pending call when the connection task ends, including by
/// unwinding.
struct FailPending(Pending);

impl Drop for FailPending {
    fn drop(&mut self) {
        self.0.fail_all();
    }
}

fn on_record(record: Parsed, pending: &Pending, observer: &dyn ClientObserver) {
    let (xid, result) = match record {
        Parsed::Message(RpcMessage::Reply(reply)) => {
            observer.reply_received(&reply);
            let xid = reply.xid;
            match reply.error() {
                None => (xid, Ok(reply)),
                Some(err) => (xid, Err(Error::from(err))),
            }
        }
        Parsed::Message(RpcMessage::Call(call)) => {
            warn!("Unexpectedly received a Call on a client connection: {}", call);
            return;
        }
        Parsed::Rejected { xid, error, .. } => (xid, Err(error)),
    };

    match pending.take(xid) {
        Some(callback) => {
            trace!("xid {}: reply matched", xid);
            complete(xid, callback, result);
        }
        None => {
            warn!("Received unsolicited reply, xid {}", xid);
            observer.connection_fault(&Error::UnsolicitedReply(xid));
        }
    }
}
