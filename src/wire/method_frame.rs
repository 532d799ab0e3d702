use bytes::{BufMut, Bytes, BytesMut};

use crate::call::method_invocation::MethodInvocation;
use crate::util::buf::{put_len_prefixed, try_get_delimited_string, try_get_len_prefixed, try_get_u64_le, try_get_u8};
use crate::wire::{check_fully_consumed, check_header, put_header, FrameKind, DELIMITER, HEADER_LEN};

impl MethodInvocation {
    pub fn ser(&self, buf: &mut BytesMut) {
        put_header(buf, FrameKind::Method);
        buf.put_u64_le(self.id);
        buf.put_slice(self.name.as_bytes());
        buf.put_u8(DELIMITER);
        buf.put_u8(self.params.len() as u8);
        for param in &self.params {
            put_len_prefixed(buf, param);
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.ser(&mut buf);
        buf.freeze()
    }

    fn encoded_len(&self) -> usize {
        HEADER_LEN
            + size_of::<u64>()
            + self.name.len() + 1
            + 1
            + self.params.iter().map(|p| size_of::<u32>() + p.len()).sum::<usize>()
    }

    pub fn try_deser(mut buf: &[u8]) -> anyhow::Result<MethodInvocation> {
        let buf = &mut buf;
        check_header(buf, FrameKind::Method)?;

        let id = try_get_u64_le(buf, "method id")?;
        let name = try_get_delimited_string(buf, DELIMITER, "method name")?;
        let num_params = try_get_u8(buf, "parameter count")?;

        let mut params = Vec::with_capacity(num_params as usize);
        for _ in 0..num_params {
            params.push(try_get_len_prefixed(buf, "parameter")?);
        }
        check_fully_consumed(buf)?;

        Ok(MethodInvocation {
            id,
            name,
            params,
        })
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    fn invocation(id: u64, name: &str, params: &[&'static [u8]]) -> MethodInvocation {
        MethodInvocation::new(id, name, params.iter().map(|p| Bytes::from_static(*p)).collect()).unwrap()
    }

    #[rstest]
    #[case::no_params(invocation(1, "Ping", &[]), b"1M\x01\0\0\0\0\0\0\0Ping;\0")]
    #[case::two_params(invocation(0x0102, "Divide", &[b"10", b"2"]), b"1M\x02\x01\0\0\0\0\0\0Divide;\x02\x02\0\0\010\x01\0\0\02")]
    #[case::empty_param(invocation(3, "f", &[b""]), b"1M\x03\0\0\0\0\0\0\0f;\x01\0\0\0\0")]
    fn test_ser(#[case] invocation: MethodInvocation, #[case] expected: &[u8]) {
        let encoded = invocation.encode();
        assert_eq!(encoded.as_ref(), expected);
        assert_eq!(encoded.len(), invocation.encoded_len());
        assert_eq!(MethodInvocation::try_deser(&encoded).unwrap(), invocation);
    }

    #[rstest]
    #[case::result_frame(b"1R\x01\0\0\0\0\0\0\0S\0\0\0\0")]
    #[case::header_only(b"1M")]
    #[case::truncated_id(b"1M\x01\0\0")]
    #[case::missing_delimiter(b"1M\x01\0\0\0\0\0\0\0Ping")]
    #[case::missing_param_count(b"1M\x01\0\0\0\0\0\0\0Ping;")]
    #[case::missing_param(b"1M\x01\0\0\0\0\0\0\0Ping;\x01")]
    #[case::param_length_past_end(b"1M\x01\0\0\0\0\0\0\0Ping;\x01\x05\0\0\0abc")]
    #[case::trailing_bytes(b"1M\x01\0\0\0\0\0\0\0Ping;\0xyz")]
    #[case::invalid_utf8_name(b"1M\x01\0\0\0\0\0\0\0\xff;\0")]
    fn test_try_deser_malformed(#[case] frame: &[u8]) {
        assert!(MethodInvocation::try_deser(frame).is_err());
    }

    #[test]
    fn test_round_trip_max_params() {
        let params = (0..=253u8)
            .map(|i| Bytes::from(vec![i; i as usize]))
            .chain(std::iter::once(Bytes::new()))
            .collect::<Vec<_>>();
        assert_eq!(params.len(), MethodInvocation::MAX_PARAMS);

        let invocation = MethodInvocation::new(u64::MAX, "Many", params).unwrap();
        assert_eq!(MethodInvocation::try_deser(&invocation.encode()).unwrap(), invocation);
    }

    #[test]
    fn test_round_trip_unicode_name() {
        let invocation = MethodInvocation::new(42, "änderName", vec![Bytes::from_static("ö".as_bytes())]).unwrap();
        assert_eq!(MethodInvocation::try_deser(&invocation.encode()).unwrap(), invocation);
    }
}
