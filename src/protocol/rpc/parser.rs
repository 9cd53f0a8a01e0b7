//! Record-marking framer (RFC 5531 section 11, previously RFC 1057 section 10).
//!
//! Transport reads arrive in arbitrary chunks. The parser carries bytes over
//! between reads until a whole record is buffered, splits reads that hold
//! more than one record, and turns every complete record into an
//! [`RpcMessage`].
//!
//! Only single-fragment records are accepted: a record mark with the
//! last-fragment flag clear is a framing fault, as are records longer than
//! the configured maximum or too short to hold an xid and message type.
//! Framing faults leave the byte stream in an unknown state and are fatal to
//! the connection.

use tracing::{trace, warn};

use crate::error::Error;
use crate::protocol::rpc::{RpcCall, RpcMessage, RpcReply, LAST_FRAGMENT};
use crate::protocol::xdr::rpc::{call_body, msg_type, reply_body};
use crate::protocol::xdr::{deserialize, XdrCursor};

/// Records longer than this are rejected unless configured otherwise.
pub const DEFAULT_MAX_RECORD_LENGTH: usize = 4 * 1024 * 1024;

/// Smallest record that can carry `{xid, type}`.
const MIN_RECORD_LENGTH: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParserState {
    AwaitingHeader,
    AwaitingBody { length: usize },
}

/// Fixed call fields ahead of the credentials.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CallHead {
    pub rpcvers: u32,
    pub prog: u32,
    pub vers: u32,
    pub proc: u32,
}

impl CallHead {
    fn read(cursor: &mut XdrCursor) -> Option<Self> {
        Some(Self {
            rpcvers: cursor.read_int().ok()?,
            prog: cursor.read_int().ok()?,
            vers: cursor.read_int().ok()?,
            proc: cursor.read_int().ok()?,
        })
    }
}

/// One framed record.
#[derive(Debug)]
pub enum Parsed {
    Message(RpcMessage),
    /// The record was framed correctly but its header did not decode. The
    /// xid is known, so the consumer can still answer or route the failure.
    /// `head` is set for calls whose fixed fields decoded, meaning the
    /// credential or verifier was at fault.
    Rejected { xid: u32, kind: msg_type, head: Option<CallHead>, error: Error },
}

/// Byte-stream state machine owned by one connection.
#[derive(Debug)]
pub struct RecordParser {
    buffer: Vec<u8>,
    state: ParserState,
    max_record_length: usize,
}

impl Default for RecordParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORD_LENGTH)
    }
}

impl RecordParser {
    pub fn new(max_record_length: usize) -> Self {
        Self { buffer: Vec::new(), state: ParserState::AwaitingHeader, max_record_length }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Bytes carried over and not yet emitted as a record.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Appends a transport read to the carry-over buffer.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Emits the next complete record, or `None` while more bytes are needed.
    pub fn next_record(&mut self) -> Result<Option<Parsed>, Error> {
        loop {
            match self.state {
                ParserState::AwaitingHeader => {
                    if self.buffer.len() < 4 {
                        return Ok(None);
                    }
                    let mark = u32::from_be_bytes([
                        self.buffer[0],
                        self.buffer[1],
                        self.buffer[2],
                        self.buffer[3],
                    ]);
                    let length = (mark & !LAST_FRAGMENT) as usize;
                    if mark & LAST_FRAGMENT == 0 {
                        warn!("Fragmented record of {} bytes is not supported", length);
                        return Err(Error::FragmentedRecord(length as u32));
                    }
                    if length > self.max_record_length {
                        return Err(Error::RecordTooLarge { length, max: self.max_record_length });
                    }
                    if length < MIN_RECORD_LENGTH {
                        return Err(Error::RecordTooShort(length));
                    }
                    trace!("Reading record length:{}", length);
                    self.state = ParserState::AwaitingBody { length };
                }
                ParserState::AwaitingBody { length } => {
                    if self.buffer.len() < 4 + length {
                        return Ok(None);
                    }
                    let record = self.buffer[4..4 + length].to_vec();
                    self.buffer.drain(..4 + length);
                    self.state = ParserState::AwaitingHeader;
                    return parse_record(record).map(Some);
                }
            }
        }
    }

    /// Pushes `chunk` and drains every record it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Parsed>, Error> {
        self.push(chunk);
        let mut records = Vec::new();
        while let Some(record) = self.next_record()? {
            records.push(record);
        }
        Ok(records)
    }
}

/// Decodes one record body (record mark already stripped).
pub fn parse_record(record: Vec<u8>) -> Result<Parsed, Error> {
    let mut cursor = XdrCursor::new(record);
    let xid = cursor.read_int()?;
    let kind = cursor.read_int()?;
    let parsed = match kind {
        0 => match deserialize::<call_body>(&mut cursor) {
            Ok(body) => {
                let payload = cursor.slice(None, None).to_vec();
                Parsed::Message(RpcMessage::Call(RpcCall::incoming(xid, body, payload)))
            }
            Err(e) => {
                cursor.rewind(Some(MIN_RECORD_LENGTH));
                let head = CallHead::read(&mut cursor);
                Parsed::Rejected { xid, kind: msg_type::CALL, head, error: e.into() }
            }
        },
        1 => match deserialize::<reply_body>(&mut cursor) {
            Ok(body) => {
                let payload = cursor.slice(None, None).to_vec();
                Parsed::Message(RpcMessage::Reply(RpcReply::incoming(xid, body, payload)))
            }
            Err(e) => Parsed::Rejected { xid, kind: msg_type::REPLY, head: None, error: e.into() },
        },
        other => return Err(Error::InvalidMessageType(other)),
    };
    Ok(parsed)
}
