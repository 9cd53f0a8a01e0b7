//! Per-call context handed to middleware, handlers and observers.

use std::fmt;
use std::net::SocketAddr;

use crate::protocol::rpc::RpcCall;
use crate::protocol::xdr::auth::Credential;

/// Header fields of one incoming call plus where it came from.
#[derive(Clone, Debug)]
pub struct CallInfo {
    /// Name of the server that accepted the call
    pub server: String,
    /// Registered procedure name
    pub procedure: String,
    pub xid: u32,
    pub prog: u32,
    pub vers: u32,
    pub proc: u32,
    /// Caller credentials, `Credential::Null` when none were sent
    pub cred: Credential,
    /// Client's network address
    pub client_addr: Option<SocketAddr>,
    /// Port the server accepted the connection on
    pub local_port: u16,
}

impl CallInfo {
    pub(crate) fn new(
        server: &str,
        procedure: &str,
        call: &RpcCall,
        client_addr: Option<SocketAddr>,
        local_port: u16,
    ) -> Self {
        Self {
            server: server.to_string(),
            procedure: procedure.to_string(),
            xid: call.xid,
            prog: call.prog(),
            vers: call.vers(),
            proc: call.proc(),
            cred: call.cred().clone(),
            client_addr,
            local_port,
        }
    }
}

impl fmt::Display for CallInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} <xid={}, prog={}, vers={}, proc={}>",
            self.server, self.procedure, self.xid, self.prog, self.vers, self.proc
        )
    }
}
