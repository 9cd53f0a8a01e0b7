use crate::protocol::rpc::DEFAULT_MAX_RECORD_LENGTH;

/// Identity and limits of one RPC program served over TCP.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Used in logs and observer events
    pub name: String,
    /// RPC program number
    pub program: u32,
    /// Supported program versions
    pub versions: Vec<u32>,
    /// Longest record a connection accepts before treating it as a framing fault
    pub max_record_length: usize,
}

impl ServerConfig {
    pub fn new(program: u32, versions: impl Into<Vec<u32>>) -> Self {
        Self {
            name: "RpcServer".to_string(),
            program,
            versions: versions.into(),
            max_record_length: DEFAULT_MAX_RECORD_LENGTH,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_record_length(mut self, max_record_length: usize) -> Self {
        self.max_record_length = max_record_length;
        self
    }

    pub fn supports_version(&self, vers: u32) -> bool {
        self.versions.contains(&vers)
    }

    /// Lowest and highest supported versions, advertised on PROG_MISMATCH.
    pub fn version_bounds(&self) -> (u32, u32) {
        let low = self.versions.iter().copied().min().unwrap_or(0);
        let high = self.versions.iter().copied().max().unwrap_or(0);
        (low, high)
    }
}
