//! Socket pump shared by server and client connections.
//!
//! One task owns the TCP stream. It feeds every read into the connection's
//! [`RecordParser`], hands each framed record to the caller, and writes the
//! records queued on the outbound channel. Records are queued already
//! serialized, record mark included, so writes never interleave.

use std::io;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, trace};

use crate::error::Error;
use crate::protocol::rpc::{Parsed, RecordParser};

/// Size of the buffer each socket read lands in.
const READ_BUFFER_SIZE: usize = 128 * 1024;

/// Work queued for the socket writer.
#[derive(Debug)]
pub enum Outbound {
    Record(Vec<u8>),
    /// Ends the connection after everything queued before it was written.
    Close,
}

/// Cloneable handle that queues records on one connection.
#[derive(Clone, Debug)]
pub struct RecordSender {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl RecordSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, record: Vec<u8>) -> Result<(), Error> {
        self.tx.send(Outbound::Record(record)).map_err(|_| Error::ConnectionClosed)
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Runs until the peer hangs up, a fatal fault occurs, `Outbound::Close` is
/// dequeued, or `shutdown` flips to `true`.
///
/// `on_record` is called synchronously for every framed record, in arrival
/// order. Returning an error from it ends the connection.
pub async fn pump<F>(
    socket: &mut TcpStream,
    parser: &mut RecordParser,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    shutdown: &mut watch::Receiver<bool>,
    mut on_record: F,
) -> Result<(), Error>
where
    F: FnMut(Parsed) -> Result<(), Error>,
{
    let _ = socket.set_nodelay(true);
    let mut buf = vec![0; READ_BUFFER_SIZE];
    let mut watch_shutdown = true;

    if *shutdown.borrow() {
        return Ok(());
    }

    loop {
        tokio::select! {
            _ = socket.readable() => {
                match socket.try_read(&mut buf) {
                    Ok(0) => {
                        debug!("Peer closed the connection");
                        return Ok(());
                    }
                    Ok(n) => {
                        trace!("Read {} bytes", n);
                        parser.push(&buf[..n]);
                        while let Some(record) = parser.next_record()? {
                            on_record(record)?;
                        }
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                        // spurious wakeup
                    }
                    Err(e) => {
                        debug!("Message handling closed : {:?}", e);
                        return Err(e.into());
                    }
                }
            },
            out = outbound.recv() => {
                match out {
                    Some(Outbound::Record(record)) => {
                        if let Err(e) = socket.write_all(&record).await {
                            error!("Write error {:?}", e);
                            return Err(e.into());
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = socket.shutdown().await;
                        return Ok(());
                    }
                }
            },
            changed = shutdown.changed(), if watch_shutdown => {
                if changed.is_err() {
                    // Owner went away without closing; keep serving.
                    watch_shutdown = false;
                } else if *shutdown.borrow() {
                    let _ = socket.shutdown().await;
                    return Ok(());
                }
            }
        }
    }
}
