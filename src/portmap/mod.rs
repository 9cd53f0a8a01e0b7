//! PORTMAP protocol (RFC 1057 Appendix A), served and consumed through the
//! generic server and client engines.
//!
//! Portmap (also known as Portmapper) is a service that maps RPC program numbers
//! to network port numbers. Clients use the Portmapper to locate the port number
//! for a specific RPC service they wish to use.

// Keep original RFC naming conventions for consistency with the specification
#![allow(non_camel_case_types)]

use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use crate::xdr::{deserialize, Deserialize, DeserializeStruct, Serialize, SerializeStruct};

mod client;
mod server;

pub use client::PortmapClient;
pub use server::{PortmapServer, PortmapTable};

/// Represents a mapping between an RPC program and a network port.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct mapping {
    /// The RPC program number
    pub prog: u32,
    /// The RPC program version number
    pub vers: u32,
    /// The transport protocol (TCP or UDP, see IPPROTO_* constants)
    pub prot: u32,
    /// The port number where the service is listening
    pub port: u32,
}
DeserializeStruct!(mapping, prog, vers, prot, port);
SerializeStruct!(mapping, prog, vers, prot, port);

impl mapping {
    pub fn new(prog: u32, vers: u32, prot: u32, port: u32) -> Self {
        Self { prog, vers, prot, port }
    }
}

/// Protocol number for TCP/IP
pub const IPPROTO_TCP: u32 = 6;
/// Protocol number for UDP/IP
pub const IPPROTO_UDP: u32 = 17;
/// Portmap RPC program number
pub const PROGRAM: u32 = 100000;
/// Portmap RPC version number
pub const VERSION: u32 = 2;
/// Well-known portmapper port
pub const PMAP_PORT: u16 = 111;

/// Procedure numbers for the Portmap RPC service.
#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum PortmapProgram {
    /// Null procedure for service availability testing
    PMAPPROC_NULL = 0,
    /// Register a new program-to-port mapping
    PMAPPROC_SET = 1,
    /// Remove a program-to-port mapping
    PMAPPROC_UNSET = 2,
    /// Look up the port for a program
    PMAPPROC_GETPORT = 3,
    /// List all registered program-to-port mappings
    PMAPPROC_DUMP = 4,
}

impl PortmapProgram {
    pub fn proc(self) -> u32 {
        self as u32
    }
}

/// Result of PMAPPROC_DUMP.
///
/// On the wire this is the RFC's linked list `struct pmaplist *`: every entry
/// is preceded by TRUE and the list ends with FALSE.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct pmaplist(pub Vec<mapping>);

impl Serialize for pmaplist {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        for map in &self.0 {
            true.serialize(dest)?;
            map.serialize(dest)?;
        }
        false.serialize(dest)
    }
}

impl Deserialize for pmaplist {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.0.clear();
        while deserialize::<bool>(src)? {
            self.0.push(deserialize::<mapping>(src)?);
        }
        Ok(())
    }
}
