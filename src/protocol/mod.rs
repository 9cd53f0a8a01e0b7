//! Wire protocol layers shared by the server and client engines.
//!
//! - `xdr`: External Data Representation (RFC 4506) for serialization and
//!   deserialization of data structures, including the RPC message header
//!   and credential types.
//!
//! - `rpc`: Remote Procedure Call (RFC 1057) message model, record-marking
//!   framing over TCP, error replies and transaction ids.

pub mod rpc;
pub mod xdr;
