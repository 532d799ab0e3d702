use std::str::FromStr;

use anyhow::bail;
use bytes::{BufMut, Bytes, BytesMut};

use crate::call::rpc_result::{Failure, FailureKind, Outcome, RpcResult};
use crate::util::buf::{put_len_prefixed, try_get_delimited_string, try_get_len_prefixed, try_get_u64_le, try_get_u8};
use crate::wire::{check_fully_consumed, check_header, put_header, FrameKind, DELIMITER};

const OUTCOME_SUCCESS: u8 = b'S';
const OUTCOME_FAILURE: u8 = b'F';

impl RpcResult {
    pub fn ser(&self, buf: &mut BytesMut) {
        put_header(buf, FrameKind::Result);
        buf.put_u64_le(self.method_id);
        match &self.outcome {
            Outcome::Success(return_value) => {
                buf.put_u8(OUTCOME_SUCCESS);
                put_len_prefixed(buf, return_value);
            }
            Outcome::Failure(failure) => {
                buf.put_u8(OUTCOME_FAILURE);
                buf.put_slice(failure.kind.as_str().as_bytes());
                buf.put_u8(DELIMITER);
                put_len_prefixed(buf, failure.message.as_bytes());
            }
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.ser(&mut buf);
        buf.freeze()
    }

    pub fn try_deser(mut buf: &[u8]) -> anyhow::Result<RpcResult> {
        let buf = &mut buf;
        check_header(buf, FrameKind::Result)?;

        let method_id = try_get_u64_le(buf, "method id")?;
        let outcome = match try_get_u8(buf, "outcome tag")? {
            OUTCOME_SUCCESS => {
                Outcome::Success(try_get_len_prefixed(buf, "return value")?)
            }
            OUTCOME_FAILURE => {
                let kind = FailureKind::from_str(&try_get_delimited_string(buf, DELIMITER, "failure kind")?)?;
                let message = try_get_len_prefixed(buf, "failure message")?;
                Outcome::Failure(Failure {
                    kind,
                    message: String::from_utf8(message.to_vec())?,
                })
            }
            tag => bail!("invalid outcome tag {:?}", tag as char),
        };
        check_fully_consumed(buf)?;

        Ok(RpcResult {
            method_id,
            outcome,
        })
    }
}
