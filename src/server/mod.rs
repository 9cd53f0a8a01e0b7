//! Server dispatch engine.
//!
//! An [`RpcServer`] serves one RPC program over TCP. It is configured first
//! (procedures, middleware, observer, fault handler) and then consumed by
//! [`RpcServer::start`], which freezes the procedure table and shares it
//! read-only between all connections.
//!
//! ```text
//! let mut server = RpcServer::new(ServerConfig::new(100000, vec![2]));
//! server.register::<mapping, u32>(3, "getport", vec![Arc::new(GetPort)]);
//! let handle = server.start("127.0.0.1:111").await?;
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

mod chain;
mod config;
mod connection;
mod context;
mod handler;
mod listener;
mod observer;
mod procedure;

pub use config::ServerConfig;
pub use context::CallInfo;
pub use handler::{Call, ChainState, Handler, Middleware, Next, Reply};
pub use listener::{generate_host_ip, RpcTcp, RpcTcpListener};
pub use observer::{CompletionEvent, LoggingObserver, NoopObserver, Observer};

use crate::protocol::xdr::{Deserialize, Serialize};
use connection::ServerShared;
use procedure::{Procedure, ProcedureTable};

/// Called for faults that are not wire-level RPC errors. When installed, the
/// connection stays open; otherwise it is closed.
pub type FaultHandler = Arc<dyn Fn(&CallInfo, &anyhow::Error) + Send + Sync>;

/// Builder for a server of one RPC program.
pub struct RpcServer {
    config: ServerConfig,
    procedures: ProcedureTable,
    middleware: Vec<Arc<dyn Middleware>>,
    observer: Arc<dyn Observer>,
    fault_handler: Option<FaultHandler>,
}

impl RpcServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            procedures: ProcedureTable::default(),
            middleware: Vec::new(),
            observer: Arc::new(NoopObserver),
            fault_handler: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Appends to the chain every procedure runs before its own handlers.
    pub fn use_middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Binds `proc` to a handler chain. Arguments decode into `C`; results
    /// encode from `R`. Registering the same number twice replaces the chain.
    pub fn register<C, R>(
        &mut self,
        proc: u32,
        name: &str,
        handlers: Vec<Arc<dyn Handler<C, R>>>,
    ) -> &mut Self
    where
        C: Deserialize + Default + Send + 'static,
        R: Serialize + Default + Send + 'static,
    {
        if proc == 0 {
            warn!("{}: procedure 0 is answered by the built-in NULL handler", self.config.name);
        }
        if let Some(previous) = self.procedures.insert(proc, Procedure::new(name, handlers)) {
            warn!(
                "{}: procedure {} ({}) replaced by {}",
                self.config.name, proc, previous.name, name
            );
        }
        self
    }

    /// [`RpcServer::register`] for procedures that take no arguments.
    pub fn register_void<R>(
        &mut self,
        proc: u32,
        name: &str,
        handlers: Vec<Arc<dyn Handler<(), R>>>,
    ) -> &mut Self
    where
        R: Serialize + Default + Send + 'static,
    {
        self.register::<(), R>(proc, name, handlers)
    }

    pub fn set_observer(&mut self, observer: impl Observer + 'static) -> &mut Self {
        self.observer = Arc::new(observer);
        self
    }

    pub fn on_fault(
        &mut self,
        handler: impl Fn(&CallInfo, &anyhow::Error) + Send + Sync + 'static,
    ) -> &mut Self {
        self.fault_handler = Some(Arc::new(handler));
        self
    }

    /// Binds `address` (`ip:port` or `auto:port`) and starts accepting
    /// connections in the background.
    pub async fn start(self, address: &str) -> io::Result<ServerHandle> {
        info!(
            "{}: serving program {} versions {:?} with {} procedures",
            self.config.name,
            self.config.program,
            self.config.versions,
            self.procedures.len()
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(ServerShared {
            config: self.config,
            procedures: self.procedures,
            middleware: self.middleware.into(),
            observer: self.observer,
            fault_handler: self.fault_handler,
        });
        let listener = RpcTcpListener::bind(address, shared, shutdown_rx).await?;
        let local_addr = listener.local_addr();
        let task = tokio::spawn(async move {
            if let Err(e) = listener.handle_forever().await {
                error!("Listener on {} failed: {:?}", local_addr, e);
            }
        });
        Ok(ServerHandle { local_addr, shutdown: shutdown_tx, task })
    }
}

/// A running server. Dropping the handle leaves the server running.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting, closes every open connection and waits for the
    /// listener to exit.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    /// Waits until the listener exits on its own.
    pub async fn wait(self) {
        let ServerHandle { shutdown, task, .. } = self;
        let _ = task.await;
        drop(shutdown);
    }
}
