use bytes::Bytes;
use bytesstr::BytesStr;
use std::fmt;

mod direction;
mod fmtp;
mod rtpmap;

pub use direction::Direction;
pub use fmtp::Fmtp;
pub use rtpmap::{RtpMap, static_rtpmap, static_rtpmap_by_name};

/// `name:[value]` pair which contains an unparsed/unknown attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAttribute {
    /// Attribute name, the part before the optional `:`
    pub name: BytesStr,

    /// if the optional `:` is present the part parsed after is stored inside `value`
    pub value: Option<BytesStr>,
}

impl UnknownAttribute {
    pub fn parse(src: &Bytes, line: &str) -> Self {
        match line.split_once(':') {
            None => Self {
                name: BytesStr::from_parse(src, line),
                value: None,
            },
            Some((name, value)) => Self {
                name: BytesStr::from_parse(src, name),
                value: Some(BytesStr::from_parse(src, value)),
            },
        }
    }
}

impl fmt::Display for UnknownAttribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a={}", self.name)?;

        if let Some(value) = &self.value {
            write!(f, ":{value}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_attribute() {
        let input = BytesStr::from_static("ptime:20");
        let attr = UnknownAttribute::parse(input.as_ref(), &input);

        assert_eq!(attr.name, "ptime");
        assert_eq!(attr.value.as_ref().unwrap(), "20");
        assert_eq!(attr.to_string(), "a=ptime:20");
    }

    #[test]
    fn unknown_flag_attribute() {
        let input = BytesStr::from_static("rtcp-mux");
        let attr = UnknownAttribute::parse(input.as_ref(), &input);

        assert!(attr.value.is_none());
        assert_eq!(attr.to_string(), "a=rtcp-mux");
    }
}
