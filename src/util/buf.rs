use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};


fn ensure_remaining(buf: &[u8], needed: usize, what: &str) -> anyhow::Result<()> {
    if buf.len() < needed {
        bail!("frame too short for {}: need {} bytes, have {}", what, needed, buf.len());
    }
    Ok(())
}

pub fn try_get_u8(buf: &mut &[u8], what: &str) -> anyhow::Result<u8> {
    ensure_remaining(buf, 1, what)?;
    Ok(buf.get_u8())
}

pub fn try_get_u32_le(buf: &mut &[u8], what: &str) -> anyhow::Result<u32> {
    ensure_remaining(buf, size_of::<u32>(), what)?;
    Ok(buf.get_u32_le())
}

pub fn try_get_u64_le(buf: &mut &[u8], what: &str) -> anyhow::Result<u64> {
    ensure_remaining(buf, size_of::<u64>(), what)?;
    Ok(buf.get_u64_le())
}

/// Longest field that [put_len_prefixed] can write
pub const MAX_LEN_PREFIXED: usize = u32::MAX as usize;

/// Writes a 4-byte little-endian length followed by the raw bytes. Callers ensure that `data` is
///  no longer than [MAX_LEN_PREFIXED].
pub fn put_len_prefixed(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(data);
}

pub fn try_get_len_prefixed(buf: &mut &[u8], what: &str) -> anyhow::Result<Bytes> {
    let len = try_get_u32_le(buf, what)? as usize;
    ensure_remaining(buf, len, what)?;
    Ok(buf.copy_to_bytes(len))
}

/// Reads UTF-8 text up to (and consuming) the delimiter. The delimiter itself is not part of the
///  returned string.
pub fn try_get_delimited_string(buf: &mut &[u8], delimiter: u8, what: &str) -> anyhow::Result<String> {
    let Some(pos) = buf.iter().position(|&b| b == delimiter) else {
        bail!("missing delimiter {:?} after {}", delimiter as char, what);
    };

    let s = std::str::from_utf8(&buf[..pos])?.to_string();
    buf.advance(pos + 1);
    Ok(s)
}
