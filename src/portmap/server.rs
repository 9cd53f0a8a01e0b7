//! In-memory portmapper.

use std::io;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::debug;

use super::{mapping, pmaplist, PortmapProgram, PROGRAM, VERSION};
use crate::server::{Call, Handler, Next, Reply, RpcServer, ServerConfig, ServerHandle};

/// Registration table shared by the portmap procedures.
///
/// At most one port is kept per `(prog, vers, prot)`. Entries are dumped in
/// the order they were added.
#[derive(Clone, Debug, Default)]
pub struct PortmapTable {
    entries: Arc<RwLock<Vec<mapping>>>,
}

impl PortmapTable {
    fn read(&self) -> RwLockReadGuard<'_, Vec<mapping>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<mapping>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `map` unless its `(prog, vers, prot)` is already registered.
    pub fn set(&self, map: mapping) -> bool {
        let mut entries = self.write();
        let exists = entries
            .iter()
            .any(|e| e.prog == map.prog && e.vers == map.vers && e.prot == map.prot);
        if exists {
            return false;
        }
        entries.push(map);
        true
    }

    /// Removes every protocol registered for `(prog, vers)`.
    pub fn unset(&self, prog: u32, vers: u32) -> bool {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|e| !(e.prog == prog && e.vers == vers));
        entries.len() != before
    }

    /// Port for `(prog, vers, prot)`, or 0 when not registered.
    pub fn get_port(&self, prog: u32, vers: u32, prot: u32) -> u32 {
        self.read()
            .iter()
            .find(|e| e.prog == prog && e.vers == vers && e.prot == prot)
            .map_or(0, |e| e.port)
    }

    pub fn dump(&self) -> Vec<mapping> {
        self.read().clone()
    }
}

struct SetPort(PortmapTable);
struct UnsetPort(PortmapTable);
struct GetPort(PortmapTable);
struct Dump(PortmapTable);

#[async_trait]
impl Handler<mapping, bool> for SetPort {
    fn name(&self) -> &str {
        "pmapproc_set"
    }

    async fn handle(
        &self,
        call: &mut Call<mapping>,
        reply: &mut Reply<bool>,
    ) -> anyhow::Result<Next> {
        reply.result = self.0.set(call.args);
        debug!("pmapproc_set({:?}) --> {}", call.args, reply.result);
        reply.send()?;
        Ok(Next::Continue)
    }
}

#[async_trait]
impl Handler<mapping, bool> for UnsetPort {
    fn name(&self) -> &str {
        "pmapproc_unset"
    }

    async fn handle(
        &self,
        call: &mut Call<mapping>,
        reply: &mut Reply<bool>,
    ) -> anyhow::Result<Next> {
        reply.result = self.0.unset(call.args.prog, call.args.vers);
        debug!("pmapproc_unset({:?}) --> {}", call.args, reply.result);
        reply.send()?;
        Ok(Next::Continue)
    }
}

#[async_trait]
impl Handler<mapping, u32> for GetPort {
    fn name(&self) -> &str {
        "pmapproc_getport"
    }

    async fn handle(
        &self,
        call: &mut Call<mapping>,
        reply: &mut Reply<u32>,
    ) -> anyhow::Result<Next> {
        let args = call.args;
        reply.result = self.0.get_port(args.prog, args.vers, args.prot);
        debug!("pmapproc_getport({:?}) --> {}", args, reply.result);
        reply.send()?;
        Ok(Next::Continue)
    }
}

#[async_trait]
impl Handler<(), pmaplist> for Dump {
    fn name(&self) -> &str {
        "pmapproc_dump"
    }

    async fn handle(&self, _: &mut Call<()>, reply: &mut Reply<pmaplist>) -> anyhow::Result<Next> {
        reply.result = pmaplist(self.0.dump());
        debug!("pmapproc_dump --> {} entries", reply.result.0.len());
        reply.send()?;
        Ok(Next::Continue)
    }
}

/// Portmap program 100000 version 2 over TCP.
pub struct PortmapServer {
    table: PortmapTable,
    server: RpcServer,
}

impl Default for PortmapServer {
    fn default() -> Self {
        Self::new()
    }
}

impl PortmapServer {
    pub fn new() -> Self {
        let table = PortmapTable::default();
        let config = ServerConfig::new(PROGRAM, vec![VERSION]).with_name("Portmap");
        let mut server = RpcServer::new(config);
        server
            .register::<mapping, bool>(
                PortmapProgram::PMAPPROC_SET.proc(),
                "set",
                vec![Arc::new(SetPort(table.clone()))],
            )
            .register::<mapping, bool>(
                PortmapProgram::PMAPPROC_UNSET.proc(),
                "unset",
                vec![Arc::new(UnsetPort(table.clone()))],
            )
            .register::<mapping, u32>(
                PortmapProgram::PMAPPROC_GETPORT.proc(),
                "getport",
                vec![Arc::new(GetPort(table.clone()))],
            )
            .register_void::<pmaplist>(
                PortmapProgram::PMAPPROC_DUMP.proc(),
                "dump",
                vec![Arc::new(Dump(table.clone()))],
            );
        Self { table, server }
    }

    /// Handle to the registration table, usable after the server started.
    pub fn table(&self) -> PortmapTable {
        self.table.clone()
    }

    pub fn add_mapping(&self, map: mapping) -> bool {
        self.table.set(map)
    }

    /// The underlying server, for installing middleware or an observer.
    pub fn rpc_server(&mut self) -> &mut RpcServer {
        &mut self.server
    }

    pub async fn start(self, address: &str) -> io::Result<ServerHandle> {
        self.server.start(address).await
    }
}
