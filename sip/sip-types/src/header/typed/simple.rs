//! Headers consisting of a single number or token

use crate::header::name::Name;
use crate::header::{ConstNamed, HeaderParse};
use bytesstr::BytesStr;
use std::fmt;

macro_rules! number_header {
    ($(#[$meta:meta])* $ty:ident, $name:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $ty(pub u32);

        impl ConstNamed for $ty {
            const NAME: Name = $name;
        }

        impl HeaderParse for $ty {
            fn parse_value(value: &BytesStr) -> Option<Self> {
                value.trim().parse().ok().map(Self)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

number_header!(
    /// `Expires` header, seconds
    Expires,
    Name::EXPIRES
);
number_header!(
    /// `Min-Expires` header, seconds
    MinExpires,
    Name::MIN_EXPIRES
);
number_header!(MaxForwards, Name::MAX_FORWARDS);

/// `Content-Type` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType(pub BytesStr);

impl ContentType {
    /// Compares the media type while ignoring parameters and case
    pub fn is(&self, media_type: &str) -> bool {
        self.0
            .split(';')
            .next()
            .is_some_and(|t| t.trim().eq_ignore_ascii_case(media_type))
    }
}

impl ConstNamed for ContentType {
    const NAME: Name = Name::CONTENT_TYPE;
}

impl HeaderParse for ContentType {
    fn parse_value(value: &BytesStr) -> Option<Self> {
        Some(Self(BytesStr::from_parse(value.as_ref(), value.trim())))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
