use anyhow::bail;
use bytes::Bytes;

pub const MAX_CLIENT_ID_LEN: usize = 256;

/// The first frame a client sends after connecting: its client id as UTF-8. The server uses it
///  to bind the connection to the client's queue and executed calls.
pub fn encode_hello(client_id: &str) -> anyhow::Result<Bytes> {
    check_client_id(client_id)?;
    Ok(Bytes::copy_from_slice(client_id.as_bytes()))
}

pub fn try_decode_hello(frame: &[u8]) -> anyhow::Result<String> {
    let client_id = std::str::from_utf8(frame)?;
    check_client_id(client_id)?;
    Ok(client_id.to_string())
}

fn check_client_id(client_id: &str) -> anyhow::Result<()> {
    if client_id.is_empty() {
        bail!("client id must not be empty");
    }
    if client_id.len() > MAX_CLIENT_ID_LEN {
        bail!("client id is longer than {} bytes", MAX_CLIENT_ID_LEN);
    }
    Ok(())
}
