//! Wire/disk byte-layout primitives (§6). `laminar-core` only defines the byte layout and
//! the length-prefixed frame boundary; the actual non-blocking socket multiplexing that
//! moves these frames across a `TcpStream` is a Framed Transport collaborator concern and
//! lives in the `laminar` binary crate.

use std::convert::TryInto;

/// The largest payload a single frame may carry (§6).
pub const MAX_FRAME_LEN: usize = 65534;

#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum WireError {
    #[error("frame payload of {0} bytes exceeds the {MAX_FRAME_LEN}-byte limit")]
    FrameTooLarge(usize),

    #[error("unexpected end of buffer reading {0}")]
    Truncated(&'static str),

    #[error("unknown mutation kind ordinal {0}")]
    UnknownMutationKind(u8),

    #[error("unknown event kind ordinal {0}")]
    UnknownEventKind(u8),

    #[error("topic name length {0} is out of the 1..=127 range")]
    InvalidTopicLength(usize),

    #[error("topic name may not start with '.': that prefix is reserved")]
    ReservedTopicPrefix,

    #[error("cluster config entry count {0} is out of the 1..=31 range")]
    InvalidConfigSize(usize),

    #[error("ip address length {0} is neither 4 nor 16")]
    InvalidIpLength(usize),

    #[error("utf-8 decode error in topic name")]
    InvalidUtf8,
}

pub type WireResult<T> = std::result::Result<T, WireError>;

/// Prefix `payload` with its 2-byte big-endian length, per §6.
pub fn encode_frame(payload: &[u8]) -> WireResult<Vec<u8>> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(payload.len()));
    }
    let mut out = Vec::with_capacity(2 + payload.len());
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// A cursor over an in-memory buffer used to decode the fixed byte layouts of §6.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize, what: &'static str) -> WireResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(WireError::Truncated(what));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn u8(&mut self) -> WireResult<u8> {
        Ok(self.take(1, "u8")?[0])
    }

    pub fn u16(&mut self) -> WireResult<u16> {
        Ok(u16::from_be_bytes(self.take(2, "u16")?.try_into().unwrap()))
    }

    pub fn u64(&mut self) -> WireResult<u64> {
        Ok(u64::from_be_bytes(self.take(8, "u64")?.try_into().unwrap()))
    }

    pub fn u128(&mut self) -> WireResult<u128> {
        Ok(u128::from_be_bytes(self.take(16, "u128")?.try_into().unwrap()))
    }

    pub fn bytes(&mut self, n: usize) -> WireResult<Vec<u8>> {
        Ok(self.take(n, "bytes")?.to_vec())
    }

    /// A 1-byte length prefix followed by that many raw bytes (e.g. topic names, keys via
    /// the 2-byte variant below).
    pub fn bytes_u8_len(&mut self) -> WireResult<Vec<u8>> {
        let n = self.u8()? as usize;
        self.bytes(n)
    }

    /// A 2-byte length prefix followed by that many raw bytes (keys, values, codes, args).
    pub fn bytes_u16_len(&mut self) -> WireResult<Vec<u8>> {
        let n = self.u16()? as usize;
        self.bytes(n)
    }
}

/// An append-only byte buffer used to encode the fixed layouts of §6.
#[derive(Default)]
pub struct Writer(pub Vec<u8>);

impl Writer {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.0.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.0.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.0.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u128(&mut self, v: u128) -> &mut Self {
        self.0.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.0.extend_from_slice(v);
        self
    }

    pub fn bytes_u8_len(&mut self, v: &[u8]) -> &mut Self {
        self.u8(v.len() as u8);
        self.bytes(v)
    }

    pub fn bytes_u16_len(&mut self, v: &[u8]) -> &mut Self {
        self.u16(v.len() as u16);
        self.bytes(v)
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

/// Validate a topic name against the §3/§8 rules: 1..=127 bytes, UTF-8, and may not start
/// with `'.'` (that prefix is reserved for the synthetic UPDATE_CONFIG topic).
pub fn validate_topic_name(name: &str) -> WireResult<()> {
    let len = name.as_bytes().len();
    if len == 0 || len > 127 {
        return Err(WireError::InvalidTopicLength(len));
    }
    if name.starts_with('.') {
        return Err(WireError::ReservedTopicPrefix);
    }
    Ok(())
}
