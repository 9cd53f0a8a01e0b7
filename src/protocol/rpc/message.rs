//! Typed RPC calls and replies.
//!
//! A message is either built from bytes handed over by the
//! [`super::RecordParser`] (incoming) or constructed locally and written out
//! once (outgoing). Writing produces one complete record: the record-marking
//! word, `xid`, message type, the fixed header fields, then room for
//! `payload_len` bytes of procedure-specific data.

use std::fmt;

use crate::error::Error;
use crate::protocol::rpc::RpcError;
use crate::protocol::xdr::auth::Credential;
use crate::protocol::xdr::rpc::{call_body, msg_type, reply_body, RPC_VERSION};
use crate::protocol::xdr::{self, Deserialize, Serialize, XdrCursor};
use crate::write_counter::encoded_len;

/// Last-fragment flag in the record-marking word.
pub const LAST_FRAGMENT: u32 = 1 << 31;

/// Largest length the 31-bit record-marking field can express.
pub const MAX_FRAGMENT_LENGTH: usize = (LAST_FRAGMENT - 1) as usize;

/// Record mark, xid and message type.
const PREAMBLE_LENGTH: usize = 12;

/// Allocates the record, writes the record mark and every header field, and
/// returns the cursor positioned where the payload goes.
fn serialize_record<H: Serialize>(
    xid: u32,
    kind: msg_type,
    head: &H,
    payload_len: usize,
) -> Result<XdrCursor, Error> {
    let head_len = encoded_len(head)?;
    let body_len = PREAMBLE_LENGTH - 4 + head_len + payload_len;
    if body_len > MAX_FRAGMENT_LENGTH {
        return Err(Error::RecordTooLarge { length: body_len, max: MAX_FRAGMENT_LENGTH });
    }

    let mut cursor = XdrCursor::with_size(4 + body_len);
    cursor.write_int(body_len as u32 | LAST_FRAGMENT)?;
    cursor.write_int(xid)?;
    kind.serialize(&mut cursor)?;
    head.serialize(&mut cursor)?;
    Ok(cursor)
}

/// Finishes a record whose payload is already known.
fn finish_record(mut cursor: XdrCursor, payload: &[u8]) -> Result<Vec<u8>, Error> {
    cursor.write_raw(payload)?;
    Ok(cursor.into_inner())
}

/// An RPC call: fixed header plus argument bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcCall {
    pub xid: u32,
    pub body: call_body,
    payload: Vec<u8>,
    incoming: bool,
    head_written: bool,
}

impl RpcCall {
    /// Outgoing call for `proc`. The client fills in xid, program and version.
    pub fn new(proc: u32) -> Self {
        Self {
            xid: 0,
            body: call_body { proc, ..call_body::default() },
            payload: Vec::new(),
            incoming: false,
            head_written: false,
        }
    }

    pub fn incoming(xid: u32, body: call_body, payload: Vec<u8>) -> Self {
        Self { xid, body, payload, incoming: true, head_written: false }
    }

    pub fn with_args<T: Serialize + ?Sized>(mut self, args: &T) -> Result<Self, Error> {
        self.set_args(args)?;
        Ok(self)
    }

    pub fn with_credential(mut self, cred: Credential) -> Self {
        self.body.cred = cred;
        self
    }

    pub fn set_args<T: Serialize + ?Sized>(&mut self, args: &T) -> Result<(), Error> {
        self.payload = xdr::to_bytes(args)?;
        Ok(())
    }

    /// Decodes the argument bytes. Trailing bytes are ignored.
    pub fn decode_args<T: Deserialize + Default>(&self) -> Result<T, Error> {
        let mut cursor = XdrCursor::new(self.payload.clone());
        Ok(xdr::deserialize::<T>(&mut cursor)?)
    }

    pub fn rpcvers(&self) -> u32 {
        self.body.rpcvers
    }

    pub fn prog(&self) -> u32 {
        self.body.prog
    }

    pub fn vers(&self) -> u32 {
        self.body.vers
    }

    pub fn proc(&self) -> u32 {
        self.body.proc
    }

    pub fn cred(&self) -> &Credential {
        &self.body.cred
    }

    pub fn verifier(&self) -> &Credential {
        &self.body.verf
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn is_incoming(&self) -> bool {
        self.incoming
    }

    /// Writes the header of an outgoing record sized for `payload_len` more
    /// bytes. May only be called once per message.
    pub fn write_head(&mut self, payload_len: usize) -> Result<XdrCursor, Error> {
        if self.head_written {
            return Err(Error::HeadAlreadyWritten);
        }
        let cursor = serialize_record(self.xid, msg_type::CALL, &self.body, payload_len)?;
        self.head_written = true;
        Ok(cursor)
    }

    /// Header followed by the stored arguments, as one record.
    pub fn send(&mut self) -> Result<Vec<u8>, Error> {
        let cursor = self.write_head(self.payload.len())?;
        finish_record(cursor, &self.payload)
    }

    /// Record size on the wire, record mark included.
    pub fn byte_length(&self) -> usize {
        PREAMBLE_LENGTH + self.body.byte_length() + self.payload.len()
    }
}

impl fmt::Display for RpcCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[object RpcCall <xid={}, prog={}, vers={}, proc={}>]",
            self.xid, self.body.prog, self.body.vers, self.body.proc
        )
    }
}

/// An RPC reply: status plus result bytes on success.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcReply {
    pub xid: u32,
    pub body: reply_body,
    payload: Vec<u8>,
    incoming: bool,
    head_written: bool,
}

impl RpcReply {
    pub fn new(xid: u32, body: reply_body) -> Self {
        Self { xid, body, payload: Vec::new(), incoming: false, head_written: false }
    }

    /// Accepted, SUCCESS, null verifier, no results yet.
    pub fn success(xid: u32) -> Self {
        Self::new(xid, reply_body::success())
    }

    pub fn from_error(err: &RpcError) -> Result<Self, Error> {
        err.to_reply()
    }

    pub fn incoming(xid: u32, body: reply_body, payload: Vec<u8>) -> Self {
        Self { xid, body, payload, incoming: true, head_written: false }
    }

    pub fn set_result<T: Serialize + ?Sized>(&mut self, result: &T) -> Result<(), Error> {
        self.payload = xdr::to_bytes(result)?;
        Ok(())
    }

    pub fn decode_result<T: Deserialize + Default>(&self) -> Result<T, Error> {
        let mut cursor = XdrCursor::new(self.payload.clone());
        Ok(xdr::deserialize::<T>(&mut cursor)?)
    }

    pub fn is_success(&self) -> bool {
        self.body.is_success()
    }

    /// The error this reply carries, if it is not a SUCCESS.
    pub fn error(&self) -> Option<RpcError> {
        super::RpcErrorKind::from_reply_body(&self.body)
            .map(|kind| RpcError::new(kind).with_xid(self.xid))
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn is_incoming(&self) -> bool {
        self.incoming
    }

    pub fn head_written(&self) -> bool {
        self.head_written
    }

    /// See [`RpcCall::write_head`].
    pub fn write_head(&mut self, payload_len: usize) -> Result<XdrCursor, Error> {
        if self.head_written {
            return Err(Error::HeadAlreadyWritten);
        }
        let cursor = serialize_record(self.xid, msg_type::REPLY, &self.body, payload_len)?;
        self.head_written = true;
        Ok(cursor)
    }

    pub fn send(&mut self) -> Result<Vec<u8>, Error> {
        let cursor = self.write_head(self.payload.len())?;
        finish_record(cursor, &self.payload)
    }
}

impl fmt::Display for RpcReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[object RpcReply <xid={}, success={}>]", self.xid, self.is_success())
    }
}

/// A parsed message of either type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RpcMessage {
    Call(RpcCall),
    Reply(RpcReply),
}

impl RpcMessage {
    pub fn xid(&self) -> u32 {
        match self {
            RpcMessage::Call(call) => call.xid,
            RpcMessage::Reply(reply) => reply.xid,
        }
    }

    pub fn msg_type(&self) -> msg_type {
        match self {
            RpcMessage::Call(_) => msg_type::CALL,
            RpcMessage::Reply(_) => msg_type::REPLY,
        }
    }
}

impl fmt::Display for RpcMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcMessage::Call(call) => call.fmt(f),
            RpcMessage::Reply(reply) => reply.fmt(f),
        }
    }
}

/// Version check shared by the server and tests.
pub fn is_supported_rpc_version(rpcvers: u32) -> bool {
    rpcvers == RPC_VERSION
}
