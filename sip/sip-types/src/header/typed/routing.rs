use crate::header::name::Name;
use crate::header::{ConstNamed, HeaderParse, parse_complete};
use crate::parse::{IResult, Parse};
use crate::uri::{NameAddr, Params};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::combinator::map;
use nom::sequence::tuple;
use std::fmt;

macro_rules! routing_header {
    ($(#[$meta:meta])* $ty:ident, $name:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $ty {
            pub uri: NameAddr,
            pub params: Params,
        }

        impl ConstNamed for $ty {
            const NAME: Name = $name;
        }

        impl Parse for $ty {
            fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
                move |i| {
                    map(
                        tuple((NameAddr::parse_no_params(src), Params::parse(src))),
                        |(uri, params)| $ty { uri, params },
                    )(i)
                }
            }
        }

        impl HeaderParse for $ty {
            const LIST: bool = true;

            fn parse_value(value: &BytesStr) -> Option<Self> {
                parse_complete(value)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", self.uri, self.params)
            }
        }
    };
}

routing_header!(
    /// `Route` header
    Route,
    Name::ROUTE
);
routing_header!(
    /// `Record-Route` header
    RecordRoute,
    Name::RECORD_ROUTE
);

impl From<RecordRoute> for Route {
    fn from(rr: RecordRoute) -> Self {
        Route {
            uri: rr.uri,
            params: rr.params,
        }
    }
}
