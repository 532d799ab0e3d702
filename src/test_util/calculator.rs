use anyhow::{anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;

use crate::call::method_invocation::MethodInvocation;
use crate::call::peer_info::PeerInfo;
use crate::channel::executor::MethodExecutor;


pub fn encode_i64(value: i64) -> Bytes {
    Bytes::copy_from_slice(&value.to_le_bytes())
}

pub fn decode_i64(buf: &[u8]) -> anyhow::Result<i64> {
    let bytes: [u8; 8] = buf.try_into()
        .map_err(|_| anyhow!("expected 8 bytes, was {}", buf.len()))?;
    Ok(i64::from_le_bytes(bytes))
}


/// A [MethodExecutor] for integer arithmetic, with parameters and return values as i64 little
///  endian. Knows `Add`, `Subtract`, `Multiply` and `Divide`, each with two parameters.
pub struct CalculatorExecutor;

#[async_trait]
impl MethodExecutor for CalculatorExecutor {
    async fn execute(&self, invocation: &MethodInvocation, _calling_peer: &PeerInfo) -> anyhow::Result<Bytes> {
        if invocation.params.len() != 2 {
            bail!("{} expects 2 parameters, got {}", invocation.name, invocation.params.len());
        }
        let a = decode_i64(&invocation.params[0])?;
        let b = decode_i64(&invocation.params[1])?;

        let result = match invocation.name.as_str() {
            "Add" => a.checked_add(b),
            "Subtract" => a.checked_sub(b),
            "Multiply" => a.checked_mul(b),
            "Divide" => {
                if b == 0 {
                    bail!("division by zero");
                }
                a.checked_div(b)
            }
            other => bail!("unknown method {:?}", other),
        };

        result
            .map(encode_i64)
            .ok_or_else(|| anyhow!("overflow in {}({}, {})", invocation.name, a, b))
    }
}
