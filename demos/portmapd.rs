use sunrpc::portmap::{mapping, PortmapServer, IPPROTO_TCP, PROGRAM, VERSION};
use sunrpc::server::LoggingObserver;

/// Binding an unprivileged port keeps the demo runnable without root.
const HOSTPORT: u32 = 11111;

/// Runs an in-memory portmapper advertising itself plus an NFS and a MOUNT
/// service, logging every completed call.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let address = match std::env::args().nth(1) {
        Some(arg) if arg == "--help" || arg == "-h" => {
            eprintln!("Usage: portmapd [IP:PORT]  (default 127.0.0.1:{HOSTPORT})");
            return;
        }
        Some(arg) => arg,
        None => format!("127.0.0.1:{HOSTPORT}"),
    };

    let mut portmap = PortmapServer::new();
    portmap.add_mapping(mapping::new(PROGRAM, VERSION, IPPROTO_TCP, 111));
    portmap.add_mapping(mapping::new(100003, 3, IPPROTO_TCP, 2049));
    portmap.add_mapping(mapping::new(100005, 3, IPPROTO_TCP, 1892));
    portmap.rpc_server().set_observer(LoggingObserver);

    let handle = portmap.start(&address).await.expect("failed to bind portmapper");
    tracing::info!("portmapd ready on {}", handle.local_addr());
    handle.wait().await;
}
