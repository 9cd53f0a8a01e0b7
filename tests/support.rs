#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use sunrpc::protocol::rpc::{RpcCall, LAST_FRAGMENT};
use sunrpc::server::{Call, Handler, Next, Reply};
use sunrpc::xdr::Serialize;

pub const PROGRAM: u32 = 200100;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn words(bytes: &[u8]) -> Vec<u32> {
    bytes.chunks(4).map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]])).collect()
}

/// Argument words written back to back, without a count.
pub struct Words<'a>(pub &'a [u32]);

impl Serialize for Words<'_> {
    fn serialize<W: std::io::Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.0.iter().try_for_each(|word| word.serialize(dest))
    }
}

/// Serialized call record for `PROGRAM`.
pub fn call_record(xid: u32, vers: u32, proc: u32, args: &[u32]) -> Vec<u8> {
    let mut call = RpcCall::new(proc).with_args(&Words(args)).expect("encode args");
    call.xid = xid;
    call.body.prog = PROGRAM;
    call.body.vers = vers;
    call.send().expect("serialize call")
}

/// Reads one record body, or `None` once the peer closed the connection.
pub async fn read_record(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut mark = [0u8; 4];
    timeout(Duration::from_secs(1), stream.read_exact(&mut mark))
        .await
        .expect("timed out waiting for a record")
        .ok()?;
    let length = (u32::from_be_bytes(mark) & !LAST_FRAGMENT) as usize;
    let mut body = vec![0; length];
    timeout(Duration::from_secs(1), stream.read_exact(&mut body))
        .await
        .expect("timed out reading record body")
        .expect("record body");
    Some(body)
}

/// Writes `record` and returns the reply as words.
pub async fn exchange(stream: &mut TcpStream, record: &[u8]) -> Vec<u32> {
    stream.write_all(record).await.expect("write record");
    words(&read_record(stream).await.expect("connection closed"))
}

/// Replies with its argument plus one.
pub struct Increment;

#[async_trait]
impl Handler<u32, u32> for Increment {
    fn name(&self) -> &str {
        "increment"
    }

    async fn handle(&self, call: &mut Call<u32>, reply: &mut Reply<u32>) -> anyhow::Result<Next> {
        reply.result = call.args.wrapping_add(1);
        reply.send()?;
        Ok(Next::Continue)
    }
}

/// Waits `args` milliseconds, then echoes `args`.
pub struct Delayed;

#[async_trait]
impl Handler<u32, u32> for Delayed {
    async fn handle(&self, call: &mut Call<u32>, reply: &mut Reply<u32>) -> anyhow::Result<Next> {
        tokio::time::sleep(Duration::from_millis(u64::from(call.args))).await;
        reply.result = call.args;
        reply.send()?;
        Ok(Next::Continue)
    }
}
