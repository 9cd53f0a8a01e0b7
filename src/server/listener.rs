//! TCP listener that accepts RPC client connections.
//!
//! The listener binds either a concrete `ip:port` or `auto:port`, which
//! probes loopback addresses in the `127.88.x.y` range until one is free.
//! Every accepted socket gets its own task running the connection loop.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::server::connection::{process_socket, ServerShared};

/// Generates a local loopback IP address from a 16-bit host number
/// Used for creating multiple local test addresses in the 127.88.x.y range
pub fn generate_host_ip(hostnum: u16) -> String {
    format!("127.88.{}.{}", ((hostnum >> 8) & 0xFF) as u8, (hostnum & 0xFF) as u8)
}

/// Interface for RPC TCP servers.
#[async_trait]
pub trait RpcTcp: Send + Sync {
    /// Returns the actual port number on which the server is listening
    ///
    /// This is especially useful when binding to port 0, which allows the OS
    /// to assign any available port.
    fn get_listen_port(&self) -> u16;

    /// Returns the IP address on which the server is listening
    ///
    /// This is useful with the "auto" IP address form, to determine the
    /// loopback address that was actually picked.
    fn get_listen_ip(&self) -> IpAddr;

    /// Accepts connections until the shutdown signal fires or the listener fails.
    async fn handle_forever(&self) -> io::Result<()>;
}

/// Accepts connections for one [`crate::server::RpcServer`].
pub struct RpcTcpListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    shared: Arc<ServerShared>,
    shutdown: watch::Receiver<bool>,
}

impl RpcTcpListener {
    /// Binds `ipstr`, given as `"IP:PORT"` (e.g. `"127.0.0.1:111"`) or
    /// `"auto:PORT"`.
    pub(crate) async fn bind(
        ipstr: &str,
        shared: Arc<ServerShared>,
        shutdown: watch::Receiver<bool>,
    ) -> io::Result<RpcTcpListener> {
        let (ip, port) = ipstr.rsplit_once(':').ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "IP Address must be of form ip:port")
        })?;
        let port = port.parse::<u16>().map_err(|_| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "Port not in range 0..=65535")
        })?;

        if ip != "auto" {
            return RpcTcpListener::bind_internal(ip, port, shared, shutdown).await;
        }

        const NUM_TRIES: u16 = 32;
        for try_ip in 1..=NUM_TRIES {
            let ip = generate_host_ip(try_ip);
            let result =
                RpcTcpListener::bind_internal(&ip, port, shared.clone(), shutdown.clone()).await;

            if result.is_ok() {
                return result;
            }
        }

        Err(io::Error::other("Can't bind automatically"))
    }

    async fn bind_internal(
        ip: &str,
        port: u16,
        shared: Arc<ServerShared>,
        shutdown: watch::Receiver<bool>,
    ) -> io::Result<RpcTcpListener> {
        let ip = ip.trim_start_matches('[').trim_end_matches(']');
        let listener = TcpListener::bind((ip, port)).await?;
        let local_addr = listener.local_addr()?;
        info!("{} listening on {}", shared.config.name, local_addr);

        Ok(RpcTcpListener { listener, local_addr, shared, shutdown })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl RpcTcp for RpcTcpListener {
    fn get_listen_port(&self) -> u16 {
        self.local_addr.port()
    }

    fn get_listen_ip(&self) -> IpAddr {
        self.local_addr.ip()
    }

    async fn handle_forever(&self) -> io::Result<()> {
        let mut shutdown = self.shutdown.clone();
        let mut watch_shutdown = true;
        if *shutdown.borrow() {
            return Ok(());
        }
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (socket, client_addr) = accepted?;
                    info!("Accepting connection from {}", client_addr);
                    debug!("Accepting socket {:?}", socket);
                    let shared = Arc::clone(&self.shared);
                    let shutdown = self.shutdown.clone();
                    tokio::spawn(async move {
                        let _ = process_socket(socket, shared, shutdown).await;
                    });
                }
                changed = shutdown.changed(), if watch_shutdown => {
                    if changed.is_err() {
                        watch_shutdown = false;
                    } else if *shutdown.borrow() {
                        info!("{} stopped accepting connections", self.shared.config.name);
                        return Ok(());
                    }
                }
            }
        }
    }
}
