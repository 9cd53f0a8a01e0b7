use std::time::Duration;

use tokio::time::timeout;

use sunrpc::portmap::{
    mapping, PortmapClient, PortmapProgram, PortmapServer, IPPROTO_TCP, IPPROTO_UDP, PROGRAM,
    VERSION,
};
use sunrpc::protocol::rpc::{RpcCall, RpcErrorKind};
use sunrpc::server::ServerHandle;
use sunrpc::Error;

const PORTMAP_ENTRY: mapping =
    mapping { prog: PROGRAM, vers: VERSION, prot: IPPROTO_TCP, port: 111 };

async fn start(entries: &[mapping]) -> ServerHandle {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let server = PortmapServer::new();
    for entry in entries {
        assert!(server.add_mapping(*entry));
    }
    server.start("127.0.0.1:0").await.expect("start portmapper")
}

async fn connect(handle: &ServerHandle) -> PortmapClient {
    PortmapClient::connect(&handle.local_addr().to_string()).await.expect("connect")
}

#[tokio::test]
async fn dump_returns_registered_mapping() {
    let handle = start(&[PORTMAP_ENTRY]).await;
    let client = connect(&handle).await;

    let entries = timeout(Duration::from_secs(1), client.dump()).await.expect("timeout");
    assert_eq!(entries.expect("dump"), vec![PORTMAP_ENTRY]);

    client.close().await;
    handle.close().await;
}

#[tokio::test]
async fn dump_of_empty_table() {
    let handle = start(&[]).await;
    let client = connect(&handle).await;
    assert!(client.dump().await.expect("dump").is_empty());
    client.close().await;
    handle.close().await;
}

#[tokio::test]
async fn set_getport_unset() {
    let handle = start(&[PORTMAP_ENTRY]).await;
    let client = connect(&handle).await;
    client.null().await.expect("null");

    let nfs_tcp = mapping::new(100003, 3, IPPROTO_TCP, 2049);
    let nfs_udp = mapping::new(100003, 3, IPPROTO_UDP, 2049);
    assert!(client.set(nfs_tcp).await.expect("set"));
    assert!(client.set(nfs_udp).await.expect("set"));
    // one port per (prog, vers, prot)
    assert!(!client.set(mapping { port: 2050, ..nfs_tcp }).await.expect("set again"));

    assert_eq!(client.get_port(100003, 3, IPPROTO_TCP).await.expect("getport"), 2049);
    assert_eq!(client.get_port(100003, 4, IPPROTO_TCP).await.expect("getport"), 0);
    assert_eq!(
        client.dump().await.expect("dump"),
        vec![PORTMAP_ENTRY, nfs_tcp, nfs_udp]
    );

    // unset drops every protocol of the version
    assert!(client.unset(100003, 3).await.expect("unset"));
    assert!(!client.unset(100003, 3).await.expect("unset again"));
    assert_eq!(client.get_port(100003, 3, IPPROTO_UDP).await.expect("getport"), 0);
    assert_eq!(client.dump().await.expect("dump"), vec![PORTMAP_ENTRY]);

    client.close().await;
    handle.close().await;
}

#[tokio::test]
async fn callit_is_not_served() {
    let handle = start(&[]).await;
    let client = connect(&handle).await;
    let err = client.rpc_client().call(RpcCall::new(5)).await.expect_err("CALLIT answered");
    assert!(
        matches!(&err, Error::Rpc(e) if e.kind() == RpcErrorKind::ProcedureUnavailable),
        "unexpected {err:?}"
    );
    assert_eq!(PortmapProgram::PMAPPROC_DUMP.proc(), 4);
    client.close().await;
    handle.close().await;
}
