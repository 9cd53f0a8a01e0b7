use crate::client::{ClientConfig, RpcClient};
use crate::error::Error;

use super::{mapping, pmaplist, PortmapProgram, PROGRAM, VERSION};

/// Client for a remote portmapper.
pub struct PortmapClient {
    client: RpcClient,
}

impl PortmapClient {
    /// Connects to the portmapper at `url` (`tcp://host:port` or `host:port`).
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let client = RpcClient::connect(ClientConfig::new(PROGRAM, VERSION, url)).await?;
        Ok(Self { client })
    }

    pub fn rpc_client(&self) -> &RpcClient {
        &self.client
    }

    pub async fn null(&self) -> Result<(), Error> {
        self.client.ping().await
    }

    pub async fn set(&self, map: mapping) -> Result<bool, Error> {
        self.client.call_proc(PortmapProgram::PMAPPROC_SET.proc(), &map).await
    }

    pub async fn unset(&self, prog: u32, vers: u32) -> Result<bool, Error> {
        let map = mapping { prog, vers, ..Default::default() };
        self.client.call_proc(PortmapProgram::PMAPPROC_UNSET.proc(), &map).await
    }

    /// Port registered for `(prog, vers, prot)`; 0 means not registered.
    pub async fn get_port(&self, prog: u32, vers: u32, prot: u32) -> Result<u32, Error> {
        let map = mapping { prog, vers, prot, port: 0 };
        self.client.call_proc(PortmapProgram::PMAPPROC_GETPORT.proc(), &map).await
    }

    pub async fn dump(&self) -> Result<Vec<mapping>, Error> {
        let proc = PortmapProgram::PMAPPROC_DUMP.proc();
        let list: pmaplist = self.client.call_proc(proc, &()).await?;
        Ok(list.0)
    }

    pub async fn close(self) {
        self.client.close().await
    }
}
