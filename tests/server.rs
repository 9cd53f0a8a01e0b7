use std::sync::Arc;
use std::time::Duration;

mod support;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use sunrpc::protocol::rpc::{RpcCall, RpcError, RpcErrorKind};
use sunrpc::server::{
    Call, CallInfo, ChainState, CompletionEvent, Handler, Middleware, Next, Observer, Reply,
    RpcServer, ServerConfig, ServerHandle,
};

use sunrpc::xdr::auth::{auth_unix, Credential};

use support::{call_record, exchange, init_logging, read_record, Increment, Words, PROGRAM};

struct Refuse;

#[async_trait]
impl Handler<u32, u32> for Refuse {
    async fn handle(&self, _: &mut Call<u32>, _: &mut Reply<u32>) -> anyhow::Result<Next> {
        Ok(Next::Error(RpcError::procedure_unavailable()))
    }
}

struct Silent;

#[async_trait]
impl Handler<u32, u32> for Silent {
    async fn handle(&self, _: &mut Call<u32>, _: &mut Reply<u32>) -> anyhow::Result<Next> {
        Ok(Next::Abort)
    }
}

struct Fail;

#[async_trait]
impl Handler<u32, u32> for Fail {
    async fn handle(&self, _: &mut Call<u32>, _: &mut Reply<u32>) -> anyhow::Result<Next> {
        Err(anyhow!("handler blew up"))
    }
}

struct Panic;

#[async_trait]
impl Handler<u32, u32> for Panic {
    async fn handle(&self, _: &mut Call<u32>, _: &mut Reply<u32>) -> anyhow::Result<Next> {
        panic!("handler panicked on purpose");
    }
}

/// Doubles the argument into the result without replying.
struct Double;

#[async_trait]
impl Handler<u32, u32> for Double {
    async fn handle(&self, call: &mut Call<u32>, reply: &mut Reply<u32>) -> anyhow::Result<Next> {
        call.args *= 2;
        reply.result = call.args;
        Ok(Next::Continue)
    }
}

struct SendResult;

#[async_trait]
impl Handler<u32, u32> for SendResult {
    async fn handle(&self, _: &mut Call<u32>, reply: &mut Reply<u32>) -> anyhow::Result<Next> {
        reply.send()?;
        Ok(Next::Continue)
    }
}

/// Refuses every call to procedure 7.
struct Gate;

#[async_trait]
impl Middleware for Gate {
    async fn handle(&self, call: &CallInfo) -> anyhow::Result<Next> {
        if call.proc == 7 {
            return Err(RpcError::garbage_arguments().into());
        }
        Ok(Next::Continue)
    }
}

struct Recorder(mpsc::UnboundedSender<(String, ChainState)>);

impl Observer for Recorder {
    fn rpc_done(&self, event: &CompletionEvent<'_>) {
        let _ = self.0.send((event.procedure.to_string(), event.state));
    }
}

fn test_server() -> RpcServer {
    let mut server = RpcServer::new(ServerConfig::new(PROGRAM, vec![2, 3]).with_name("test"));
    server
        .register::<u32, u32>(1, "increment", vec![Arc::new(Increment)])
        .register::<u32, u32>(2, "refuse", vec![Arc::new(Refuse)])
        .register::<u32, u32>(3, "silent", vec![Arc::new(Silent)])
        .register::<u32, u32>(4, "fail", vec![Arc::new(Fail)])
        .register::<u32, u32>(5, "panic", vec![Arc::new(Panic)])
        .register::<u32, u32>(6, "double", vec![Arc::new(Double), Arc::new(SendResult)])
        .register::<u32, u32>(7, "gated", vec![Arc::new(Increment)]);
    server
}

async fn start(server: RpcServer) -> (ServerHandle, TcpStream) {
    init_logging();
    let handle = server.start("127.0.0.1:0").await.expect("start server");
    let stream = TcpStream::connect(handle.local_addr()).await.expect("connect");
    (handle, stream)
}

#[tokio::test]
async fn rejects_wrong_rpc_version() {
    let (handle, mut stream) = start(test_server()).await;

    let call = "8000002899fff32a0000000000000001000186a0000000020000000400000000000000000000000000000000";
    let bytes: Vec<u8> = (0..call.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&call[i..i + 2], 16).expect("hex"))
        .collect();

    let reply = exchange(&mut stream, &bytes).await;
    // xid, REPLY, MSG_DENIED, RPC_MISMATCH, low, high
    assert_eq!(reply, vec![0x99fff32a, 1, 1, 0, 2, 2]);
    handle.close().await;
}

#[tokio::test]
async fn validation_failures_keep_connection_open() {
    let (handle, mut stream) = start(test_server()).await;

    // unregistered procedure
    let reply = exchange(&mut stream, &call_record(1, 2, 42, &[])).await;
    assert_eq!(reply, vec![1, 1, 0, 0, 0, 3]);

    // unsupported version: bounds of the supported set
    let reply = exchange(&mut stream, &call_record(2, 9, 1, &[])).await;
    assert_eq!(reply, vec![2, 1, 0, 0, 0, 2, 2, 3]);

    // NULL is answered regardless of the procedure table
    let reply = exchange(&mut stream, &call_record(3, 3, 0, &[])).await;
    assert_eq!(reply, vec![3, 1, 0, 0, 0, 0]);

    let reply = exchange(&mut stream, &call_record(4, 2, 1, &[41])).await;
    assert_eq!(reply, vec![4, 1, 0, 0, 0, 0, 42]);
    handle.close().await;
}

#[tokio::test]
async fn rejects_unknown_program() {
    let (handle, mut stream) = start(test_server()).await;
    let mut record = call_record(8, 2, 1, &[]);
    record[16..20].copy_from_slice(&100003u32.to_be_bytes());
    let reply = exchange(&mut stream, &record).await;
    assert_eq!(reply, vec![8, 1, 0, 0, 0, 1]);
    handle.close().await;
}

#[tokio::test]
async fn rejects_unsupported_auth_flavor() {
    let (handle, mut stream) = start(test_server()).await;
    let mut record = call_record(9, 2, 1, &[]);
    record[28..32].copy_from_slice(&3u32.to_be_bytes());
    let reply = exchange(&mut stream, &record).await;
    // MSG_DENIED, AUTH_ERROR, AUTH_BADCRED
    assert_eq!(reply, vec![9, 1, 1, 1, 1]);
    handle.close().await;
}

#[tokio::test]
async fn version_checks_come_before_credentials() {
    let (handle, mut stream) = start(test_server()).await;

    let mut record = call_record(22, 2, 1, &[]);
    record[12..16].copy_from_slice(&1u32.to_be_bytes());
    record[28..32].copy_from_slice(&3u32.to_be_bytes());
    let reply = exchange(&mut stream, &record).await;
    assert_eq!(reply, vec![22, 1, 1, 0, 2, 2]);

    let mut record = call_record(23, 2, 1, &[]);
    record[16..20].copy_from_slice(&100003u32.to_be_bytes());
    record[28..32].copy_from_slice(&3u32.to_be_bytes());
    let reply = exchange(&mut stream, &record).await;
    assert_eq!(reply, vec![23, 1, 0, 0, 0, 1]);

    let mut record = call_record(24, 9, 1, &[]);
    record[28..32].copy_from_slice(&3u32.to_be_bytes());
    let reply = exchange(&mut stream, &record).await;
    assert_eq!(reply, vec![24, 1, 0, 0, 0, 2, 2, 3]);
    handle.close().await;
}

#[tokio::test]
async fn malformed_unix_credential_is_badcred() {
    let (handle, mut stream) = start(test_server()).await;

    let mut call = RpcCall::new(1).with_args(&Words(&[1])).expect("encode args");
    call.xid = 25;
    call.body.prog = PROGRAM;
    call.body.vers = 2;
    call.body.cred =
        Credential::Unix(auth_unix { machinename: "host".to_string(), ..Default::default() });
    let mut record = call.send().expect("serialize call");
    // mark, xid, type, rpcvers, prog, vers, proc, flavor, length, stamp, name length
    assert_eq!(&record[44..48], b"host");
    record[44] = 0xe9;

    let reply = exchange(&mut stream, &record).await;
    assert_eq!(reply, vec![25, 1, 1, 1, 1]);

    // the connection is still usable
    let reply = exchange(&mut stream, &call_record(26, 2, 1, &[41])).await;
    assert_eq!(reply, vec![26, 1, 0, 0, 0, 0, 42]);
    handle.close().await;
}

#[tokio::test]
async fn undecodable_arguments_are_garbage() {
    let (handle, mut stream) = start(test_server()).await;
    // procedure 1 expects one argument word
    let reply = exchange(&mut stream, &call_record(10, 2, 1, &[])).await;
    assert_eq!(reply, vec![10, 1, 0, 0, 0, 4]);
    handle.close().await;
}

#[tokio::test]
async fn chain_runs_in_order_and_reports_completion() {
    let (tx, mut events) = mpsc::unbounded_channel();
    let mut server = test_server();
    server.set_observer(Recorder(tx));
    let (handle, mut stream) = start(server).await;

    let reply = exchange(&mut stream, &call_record(11, 2, 6, &[21])).await;
    assert_eq!(reply, vec![11, 1, 0, 0, 0, 0, 42]);
    let event = timeout(Duration::from_secs(1), events.recv()).await.expect("timeout");
    assert_eq!(event, Some(("double".to_string(), ChainState::RepliedSuccess)));

    let reply = exchange(&mut stream, &call_record(12, 2, 2, &[0])).await;
    assert_eq!(reply, vec![12, 1, 0, 0, 0, 3]);
    let event = timeout(Duration::from_secs(1), events.recv()).await.expect("timeout");
    assert_eq!(event, Some(("refuse".to_string(), ChainState::RepliedError)));

    // an aborted chain writes nothing; the next call is still answered
    stream.write_all(&call_record(13, 2, 3, &[0])).await.expect("write");
    let event = timeout(Duration::from_secs(1), events.recv()).await.expect("timeout");
    assert_eq!(event, Some(("silent".to_string(), ChainState::Aborted)));
    let reply = exchange(&mut stream, &call_record(14, 2, 1, &[1])).await;
    assert_eq!(reply[0], 14);
    handle.close().await;
}

#[tokio::test]
async fn middleware_runs_before_every_procedure() {
    let mut server = test_server();
    server.use_middleware(Gate);
    let (handle, mut stream) = start(server).await;

    let reply = exchange(&mut stream, &call_record(15, 2, 7, &[1])).await;
    assert_eq!(reply, vec![15, 1, 0, 0, 0, 4]);
    let reply = exchange(&mut stream, &call_record(16, 2, 1, &[1])).await;
    assert_eq!(reply, vec![16, 1, 0, 0, 0, 0, 2]);
    handle.close().await;
}

#[tokio::test]
async fn uncaught_fault_closes_connection() {
    let (handle, mut stream) = start(test_server()).await;
    stream.write_all(&call_record(17, 2, 4, &[0])).await.expect("write");
    assert_eq!(read_record(&mut stream).await, None);
    handle.close().await;
}

#[tokio::test]
async fn panic_is_a_fault() {
    let (tx, mut events) = mpsc::unbounded_channel();
    let mut server = test_server();
    server.set_observer(Recorder(tx));
    let (handle, mut stream) = start(server).await;

    stream.write_all(&call_record(18, 2, 5, &[0])).await.expect("write");
    assert_eq!(read_record(&mut stream).await, None);
    let event = timeout(Duration::from_secs(1), events.recv()).await.expect("timeout");
    assert_eq!(event, Some(("panic".to_string(), ChainState::Faulted)));
    handle.close().await;
}

#[tokio::test]
async fn fault_handler_keeps_connection_open() {
    let (tx, mut faults) = mpsc::unbounded_channel();
    let mut server = test_server();
    server.on_fault(move |call, err| {
        let _ = tx.send((call.xid, err.to_string()));
    });
    let (handle, mut stream) = start(server).await;

    stream.write_all(&call_record(19, 2, 4, &[0])).await.expect("write");
    let fault = timeout(Duration::from_secs(1), faults.recv()).await.expect("timeout");
    assert_eq!(fault, Some((19, "handler blew up".to_string())));

    let reply = exchange(&mut stream, &call_record(20, 2, 1, &[1])).await;
    assert_eq!(reply, vec![20, 1, 0, 0, 0, 0, 2]);
    handle.close().await;
}

#[tokio::test]
async fn close_disconnects_clients() {
    let (handle, mut stream) = start(test_server()).await;
    let reply = exchange(&mut stream, &call_record(21, 2, 0, &[])).await;
    assert_eq!(reply[0], 21);

    timeout(Duration::from_secs(1), handle.close()).await.expect("close timed out");
    assert_eq!(read_record(&mut stream).await, None);
}

#[test]
fn error_kinds_map_to_reply_status() {
    let kind = RpcError::program_mismatch(2, 3).kind();
    assert_eq!(kind, RpcErrorKind::ProgramMismatch { low: 2, high: 3 });
    assert_eq!(RpcErrorKind::from_reply_body(&kind.reply_body()), Some(kind));
}
