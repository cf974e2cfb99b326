//! Header names, the [`Headers`] map and typed header values

use bytesstr::BytesStr;

mod headers;
pub mod name;
pub mod typed;

pub use headers::Headers;

/// Header types with a fixed name
pub trait ConstNamed {
    const NAME: name::Name;
}

/// Header types that can be decoded from a single header value
pub trait HeaderParse: Sized {
    /// Multiple values of this header may be joined into one line, separated by commas
    const LIST: bool = false;

    fn parse_value(value: &BytesStr) -> Option<Self>;
}

#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("missing header {0}")]
    Missing(name::Name),
    #[error("malformed header {name}: {value:?}")]
    Malformed { name: name::Name, value: BytesStr },
}

impl HeaderError {
    pub fn malformed(name: name::Name, value: &BytesStr) -> Self {
        Self::Malformed {
            name,
            value: value.clone(),
        }
    }
}

/// Parses a complete header value using a nom parser, trailing whitespace is ignored
pub(crate) fn parse_complete<T: crate::parse::Parse>(value: &BytesStr) -> Option<T> {
    let (rem, parsed) = T::parse(value.as_ref())(value).ok()?;

    rem.trim().is_empty().then_some(parsed)
}
