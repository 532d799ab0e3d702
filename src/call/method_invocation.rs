use anyhow::bail;
use bytes::Bytes;

use crate::util::buf::MAX_LEN_PREFIXED;
use crate::wire::DELIMITER;


/// One remote method call as it goes over the wire: a unique id, the method's name, and its
///  parameters. Parameters are opaque to this crate - serializing them is the application's
///  business.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MethodInvocation {
    pub id: u64,
    pub name: String,
    pub params: Vec<Bytes>,
}

impl MethodInvocation {
    pub const MAX_PARAMS: usize = u8::MAX as usize;
    pub const MAX_PARAM_LEN: usize = MAX_LEN_PREFIXED;

    /// Fails if the name contains the wire delimiter or the parameters do not fit the wire
    ///  format. Every invocation that exists can be encoded.
    pub fn new(id: u64, name: impl Into<String>, params: Vec<Bytes>) -> anyhow::Result<MethodInvocation> {
        let name = name.into();
        if name.as_bytes().contains(&DELIMITER) {
            bail!("method name {:?} contains the reserved delimiter {:?}", name, DELIMITER as char);
        }
        if params.len() > Self::MAX_PARAMS {
            bail!("method {:?} has {} parameters, the maximum is {}", name, params.len(), Self::MAX_PARAMS);
        }
        for (i, param) in params.iter().enumerate() {
            check_param_len(&name, i, param.len())?;
        }

        Ok(MethodInvocation {
            id,
            name,
            params,
        })
    }
}

fn check_param_len(name: &str, index: usize, len: usize) -> anyhow::Result<()> {
    if len > MethodInvocation::MAX_PARAM_LEN {
        bail!("parameter {} of method {:?} has {} bytes, the maximum is {}", index, name, len, MethodInvocation::MAX_PARAM_LEN);
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::plain("Divide", 2, true)]
    #[case::no_params("Ping", 0, true)]
    #[case::max_params("Many", 255, true)]
    #[case::too_many_params("Many", 256, false)]
    #[case::delimiter_in_name("a;b", 0, false)]
    #[case::empty_name("", 0, true)]
    fn test_new(#[case] name: &str, #[case] num_params: usize, #[case] is_valid: bool) {
        let params = vec![Bytes::from_static(b"x"); num_params];
        assert_eq!(MethodInvocation::new(1, name, params).is_ok(), is_valid);
    }

    #[rstest]
    #[case::empty(0, true)]
    #[case::max(u32::MAX as usize, true)]
    #[case::too_long(u32::MAX as usize + 1, false)]
    fn test_check_param_len(#[case] len: usize, #[case] is_valid: bool) {
        assert_eq!(check_param_len("f", 0, len).is_ok(), is_valid);
    }
}
