//! Deterministic wire encoding.
//!
//! Every value that crosses the socket uses one byte representation:
//!
//! - integers little-endian,
//! - `bool` as one byte,
//! - strings as a `u32` byte length plus UTF-8 bytes,
//! - sequences as a `u32` element count plus elements,
//! - options as `0x00` / `0x01` plus the value,
//! - enums as a `u32` tag plus payload fields,
//! - identifiers packed two digits per byte (20 bytes).

use std::net::SocketAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use weft_core::{Id, DIGITS};

/// Errors while decoding a wire value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Not enough bytes remained in the buffer.
    #[error("insufficient bytes: need {need}, have {have}")]
    Insufficient {
        /// Bytes the value needed.
        need: usize,
        /// Bytes available.
        have: usize,
    },

    /// A string field was not valid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    /// An enum tag outside the known range.
    #[error("invalid enum tag {0}")]
    InvalidTag(u32),

    /// A socket address that does not parse.
    #[error("invalid socket address {0:?}")]
    BadAddress(String),

    /// A declared length that exceeds the frame.
    #[error("declared length {0} exceeds remaining frame")]
    BadLength(u32),
}

/// Types with a deterministic wire representation.
pub trait WireEncode {
    /// Appends the wire representation to `buf`.
    fn encode(&self, buf: &mut BytesMut);

    /// Returns the wire representation as a fresh byte vector.
    fn to_vec(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.to_vec()
    }
}

/// Types decodable from the wire representation.
pub trait WireDecode: Sized {
    /// Consumes the wire representation from the front of `buf`.
    fn decode(buf: &mut Bytes) -> Result<Self, WireError>;

    /// Decodes a value from a complete byte slice.
    fn from_slice(bytes: &[u8]) -> Result<Self, WireError> {
        let mut buf = Bytes::copy_from_slice(bytes);
        Self::decode(&mut buf)
    }
}

fn need(buf: &Bytes, n: usize) -> Result<(), WireError> {
    if buf.remaining() < n {
        return Err(WireError::Insufficient {
            need: n,
            have: buf.remaining(),
        });
    }
    Ok(())
}

impl WireEncode for u8 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(*self);
    }
}

impl WireDecode for u8 {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        need(buf, 1)?;
        Ok(buf.get_u8())
    }
}

impl WireEncode for u32 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(*self);
    }
}

impl WireDecode for u32 {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        need(buf, 4)?;
        Ok(buf.get_u32_le())
    }
}

impl WireEncode for u64 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(*self);
    }
}

impl WireDecode for u64 {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        need(buf, 8)?;
        Ok(buf.get_u64_le())
    }
}

impl WireEncode for bool {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(*self as u8);
    }
}

impl WireDecode for bool {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(u8::decode(buf)? != 0)
    }
}

impl WireEncode for String {
    fn encode(&self, buf: &mut BytesMut) {
        (self.len() as u32).encode(buf);
        buf.put_slice(self.as_bytes());
    }
}

impl WireDecode for String {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let len = u32::decode(buf)?;
        if buf.remaining() < len as usize {
            return Err(WireError::BadLength(len));
        }
        let bytes = buf.split_to(len as usize);
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }
}

impl<T: WireEncode> WireEncode for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) {
        (self.len() as u32).encode(buf);
        for item in self {
            item.encode(buf);
        }
    }
}

impl<T: WireDecode> WireDecode for Vec<T> {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let len = u32::decode(buf)?;
        // Each element needs at least one byte; reject lengths the frame
        // cannot possibly hold before allocating.
        if buf.remaining() < len as usize {
            return Err(WireError::BadLength(len));
        }
        let mut items = Vec::with_capacity(len as usize);
        for _ in 0..len {
            items.push(T::decode(buf)?);
        }
        Ok(items)
    }
}

impl<T: WireEncode> WireEncode for Option<T> {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            None => buf.put_u8(0),
            Some(value) => {
                buf.put_u8(1);
                value.encode(buf);
            }
        }
    }
}

impl<T: WireDecode> WireDecode for Option<T> {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        match u8::decode(buf)? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(buf)?)),
            tag => Err(WireError::InvalidTag(tag as u32)),
        }
    }
}

impl WireEncode for Id {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.to_bytes());
    }
}

impl WireDecode for Id {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        need(buf, DIGITS / 2)?;
        let mut bytes = [0u8; DIGITS / 2];
        buf.copy_to_slice(&mut bytes);
        Ok(Id::from_bytes(bytes))
    }
}

impl WireEncode for SocketAddr {
    fn encode(&self, buf: &mut BytesMut) {
        self.to_string().encode(buf);
    }
}

impl WireDecode for SocketAddr {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let s = String::decode(buf)?;
        s.parse().map_err(|_| WireError::BadAddress(s))
    }
}
