use crate::parse::{IResult, Parse, token};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::bytes::complete::take_while1;
use nom::combinator::map;
use std::fmt;

/// Represents a SIP-Method.
///
/// Well known methods are constants, anything else is kept as is:
///
/// ```
/// use sipua_sip_types::Method;
///
/// let _invite_method = Method::INVITE;
/// let _custom_method = Method::from("HELLO");
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Method(Repr);

macro_rules! methods {
    ($($print:literal, $ident:ident;)+) => {
        #[derive(Debug, Clone, Eq, PartialEq, Hash)]
        #[allow(clippy::upper_case_acronyms)]
        enum Repr {
            $($ident,)+
            Other(BytesStr),
        }

        impl Method {
            $(pub const $ident: Self = Self(Repr::$ident);)+

            pub fn from_parse(src: &Bytes, slice: &str) -> Self {
                $(
                if slice.eq_ignore_ascii_case($print) {
                    return Self(Repr::$ident);
                }
                )+

                Self(Repr::Other(BytesStr::from_parse(src, slice)))
            }

            pub fn as_str(&self) -> &str {
                match &self.0 {
                    $(Repr::$ident => $print,)+
                    Repr::Other(other) => &**other,
                }
            }
        }
    };
}

methods! {
    "INVITE",   INVITE;
    "ACK",      ACK;
    "CANCEL",   CANCEL;
    "BYE",      BYE;
    "REGISTER", REGISTER;
    "OPTIONS",  OPTIONS;
    "INFO",     INFO;
    "UPDATE",   UPDATE;
    "MESSAGE",  MESSAGE;
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Parse for Method {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| map(take_while1(token), |slice| Self::from_parse(src, slice))(i)
    }
}
impl_from_str!(Method, "method");

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        let s = BytesStr::from(s);

        Self::from_parse(s.as_ref(), s.as_ref())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_method() {
        assert_eq!("invite".parse::<Method>().unwrap(), Method::INVITE);
        assert_eq!(Method::REGISTER.to_string(), "REGISTER");
    }

    #[test]
    fn other_method() {
        let method: Method = "SOMEOBSCUREMETHOD".parse().unwrap();

        assert_eq!(method, Method(Repr::Other("SOMEOBSCUREMETHOD".into())));
        assert_eq!(method.to_string(), "SOMEOBSCUREMETHOD");
    }
}
