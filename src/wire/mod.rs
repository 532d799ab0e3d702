//! Binary framing of method invocations and results. This is the one part of the crate where every
//!  bit is compatibility-relevant: peers that were built separately must agree on it.
//!
//! All integers are little-endian, all text is UTF-8.
//!
//! ```ascii
//! method frame:  '1' 'M' id:u64 name ';' num_params:u8 (len:u32 bytes)*
//! result frame:  '1' 'R' id:u64 'S' len:u32 bytes
//!                '1' 'R' id:u64 'F' kind_name ';' len:u32 message
//! ```
//!
//! Receivers look at the frame kind (see [FrameKind::peek]) before deciding which decoder to use.

pub mod method_frame;
pub mod result_frame;

use anyhow::bail;
use bytes::{Buf, BufMut, BytesMut};

pub const PROTOCOL_VERSION: u8 = b'1';
pub const KIND_METHOD: u8 = b'M';
pub const KIND_RESULT: u8 = b'R';
pub const DELIMITER: u8 = b';';

pub const HEADER_LEN: usize = 2;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FrameKind {
    Method,
    Result,
}

impl FrameKind {
    fn tag(&self) -> u8 {
        match self {
            FrameKind::Method => KIND_METHOD,
            FrameKind::Result => KIND_RESULT,
        }
    }

    /// Cheap check of a frame's header. Anything shorter than a header, with a different protocol
    ///  version or with an unknown kind has no kind.
    pub fn peek(frame: &[u8]) -> Option<FrameKind> {
        if frame.len() < HEADER_LEN || frame[0] != PROTOCOL_VERSION {
            return None;
        }
        match frame[1] {
            KIND_METHOD => Some(FrameKind::Method),
            KIND_RESULT => Some(FrameKind::Result),
            _ => None,
        }
    }
}

pub fn is_method_frame(frame: &[u8]) -> bool {
    FrameKind::peek(frame) == Some(FrameKind::Method)
}

pub fn is_result_frame(frame: &[u8]) -> bool {
    FrameKind::peek(frame) == Some(FrameKind::Result)
}

/// Reads the method id of a frame without decoding the rest of it. This allows attributing a
///  frame with a malformed body to the call it belongs to.
pub fn peek_method_id(frame: &[u8]) -> Option<u64> {
    FrameKind::peek(frame)?;
    let mut id_buf = frame.get(HEADER_LEN..HEADER_LEN + size_of::<u64>())?;
    Some(id_buf.get_u64_le())
}

fn put_header(buf: &mut BytesMut, kind: FrameKind) {
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u8(kind.tag());
}

fn check_header(buf: &mut &[u8], expected: FrameKind) -> anyhow::Result<()> {
    match FrameKind::peek(buf) {
        Some(kind) if kind == expected => {
            buf.advance(HEADER_LEN);
            Ok(())
        }
        Some(kind) => bail!("expected a {:?} frame, got a {:?} frame", expected, kind),
        None => bail!("not a valid frame header: {:?}", &buf[..buf.len().min(HEADER_LEN)]),
    }
}

fn check_fully_consumed(buf: &[u8]) -> anyhow::Result<()> {
    if !buf.is_empty() {
        bail!("{} unexpected trailing bytes after frame", buf.len());
    }
    Ok(())
}
