use crate::header::name::Name;
use crate::header::{ConstNamed, HeaderParse};
use bytesstr::BytesStr;
use std::fmt;

/// `Call-ID` header
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId(pub BytesStr);

impl CallId {
    pub fn new<B: Into<BytesStr>>(id: B) -> Self {
        Self(id.into())
    }
}

impl ConstNamed for CallId {
    const NAME: Name = Name::CALL_ID;
}

impl HeaderParse for CallId {
    fn parse_value(value: &BytesStr) -> Option<Self> {
        let id = value.trim();

        (!id.is_empty()).then(|| Self(BytesStr::from_parse(value.as_ref(), id)))
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
