//! SunRPC - ONC RPC version 2 (RFC 1057) over TCP in Rust
//!
//! This library provides both ends of an ONC RPC conversation: a server that
//! serves one RPC program through chains of async handlers, and a client that
//! multiplexes concurrent calls over a single connection.
//!
//! ## Main Components
//!
//! - `protocol`: XDR encoding/decoding, the RPC call and reply model,
//!   record-marking framing and the wire-level error replies.
//!
//! - `server`: The dispatch engine. Validates each call (RPC version,
//!   program, version, procedure), answers rejections itself and runs the
//!   registered handler chain for everything else.
//!
//! - `client`: The correlation engine. Assigns transaction ids and matches
//!   replies, which may arrive in any order, back to their calls.
//!
//! - `portmap`: A PORTMAP (program 100000) server and client built on the
//!   two engines.
//!
//! ## Standards Compliance
//!
//! - RFC 1057: RPC: Remote Procedure Call Protocol Specification Version 2
//! - RFC 4506: XDR: External Data Representation Standard
//!
//! Only TCP with single-fragment records is supported. Credentials other
//! than AUTH_NULL and AUTH_UNIX are refused with AUTH_ERROR.

pub mod client;
pub mod error;
pub mod portmap;
pub mod protocol;
pub mod server;
mod write_counter;

pub use error::{Error, Result};
pub use protocol::xdr;
