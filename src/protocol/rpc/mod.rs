//! RPC (Remote Procedure Call) protocol implementation as specified in RFC 5531 (previously RFC 1057).
//!
//! The RPC protocol enables programs to call procedures on remote systems as if
//! they were local calls. This module holds everything below the server and
//! client engines:
//!
//! 1. Typed calls and replies with one-shot header serialization
//! 2. Record-marking framing for byte-stream transports
//! 3. Wire-level errors that serialize themselves as replies
//! 4. Transaction id generation
//! 5. The socket pump both engines run their connections on

mod error;
mod message;
mod parser;
mod wire;
mod xid;

pub use error::{RpcError, RpcErrorKind};
pub use message::{
    is_supported_rpc_version, RpcCall, RpcMessage, RpcReply, LAST_FRAGMENT, MAX_FRAGMENT_LENGTH,
};
pub use parser::{
    parse_record, CallHead, Parsed, ParserState, RecordParser, DEFAULT_MAX_RECORD_LENGTH,
};
pub use wire::{pump, Outbound, RecordSender};
pub use xid::XidGenerator;
