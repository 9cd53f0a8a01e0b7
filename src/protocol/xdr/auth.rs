//! Credential and verifier encoding (RFC 5531 section 8 and appendix A).
//!
//! On the wire every credential is an `opaque_auth`: a flavor followed by a
//! length-prefixed body. Only `AUTH_NULL` and `AUTH_UNIX` bodies are
//! understood. Any other flavor fails to decode with
//! [`Error::UnsupportedAuthFlavor`] instead of being skipped.

// Keep original RFC naming conventions for consistency with the specification
#![allow(non_camel_case_types)]

use std::fmt;
use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};
use smallvec::SmallVec;

use super::*;
use crate::error::Error;

/// RFC 5531 caps the AUTH_UNIX group list at 16 entries.
pub const MAX_AUTH_UNIX_GIDS: usize = 16;

/// Authentication flavor (mechanism) identifiers for RPC
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum auth_flavor {
    /// No authentication
    AUTH_NULL = 0,
    /// UNIX-style authentication (uid/gid)
    AUTH_UNIX = 1,
    /// Short-form authentication (reserved, not decoded)
    AUTH_SHORT = 2,
    /// DES authentication (reserved, not decoded)
    AUTH_DES = 3,
}
impl SerializeEnum for auth_flavor {}
impl DeserializeEnum for auth_flavor {}

/// UNIX-style credentials used for authentication
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct auth_unix {
    /// Arbitrary id generated by the caller's machine
    pub stamp: u32,
    /// The name of the client machine
    pub machinename: String,
    /// The effective user ID of the caller
    pub uid: u32,
    /// The effective group ID of the caller
    pub gid: u32,
    /// Supplementary group IDs
    pub gids: SmallVec<[u32; MAX_AUTH_UNIX_GIDS]>,
}
DeserializeStruct!(auth_unix, stamp, machinename, uid, gid, gids);
SerializeStruct!(auth_unix, stamp, machinename, uid, gid, gids);

impl auth_unix {
    fn body_length(&self) -> usize {
        4 + self.machinename.byte_length() + 4 + 4 + self.gids.as_slice().byte_length()
    }
}

/// A decoded credential or verifier.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Credential {
    #[default]
    Null,
    Unix(auth_unix),
}

impl Credential {
    pub fn flavor(&self) -> auth_flavor {
        match self {
            Credential::Null => auth_flavor::AUTH_NULL,
            Credential::Unix(_) => auth_flavor::AUTH_UNIX,
        }
    }

    pub fn unix(&self) -> Option<&auth_unix> {
        match self {
            Credential::Unix(unix) => Some(unix),
            Credential::Null => None,
        }
    }

    /// Encoded size including the flavor and length words.
    pub fn byte_length(&self) -> usize {
        match self {
            Credential::Null => 8,
            Credential::Unix(unix) => 8 + unix.body_length(),
        }
    }
}

impl Serialize for Credential {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        self.flavor().serialize(dest)?;
        match self {
            Credential::Null => 0_u32.serialize(dest),
            Credential::Unix(unix) => {
                // Body is an opaque, already 4-byte aligned.
                UsizeAsU32(unix.body_length()).serialize(dest)?;
                unix.serialize(dest)
            }
        }
    }
}

impl Deserialize for Credential {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let flavor = deserialize::<u32>(src)?;
        let body = deserialize::<Vec<u8>>(src)?;
        *self = match flavor {
            // Null bodies are normally empty but are not required to be.
            0 => Credential::Null,
            1 => {
                let mut cursor = XdrCursor::new(body);
                Credential::Unix(deserialize::<auth_unix>(&mut cursor)?)
            }
            other => return Err(Error::UnsupportedAuthFlavor(other).into()),
        };
        Ok(())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Null => write!(f, "AUTH_NULL"),
            Credential::Unix(unix) => write!(
                f,
                "AUTH_UNIX <machine={}, uid={}, gid={}, gids={:?}>",
                unix.machinename,
                unix.uid,
                unix.gid,
                unix.gids.as_slice()
            ),
        }
    }
}
