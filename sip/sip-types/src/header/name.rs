use bytesstr::BytesStr;
use std::fmt;

/// Name of a SIP header, used as key inside [`Headers`].
///
/// Names compare case-insensitively, compact forms are expanded while parsing.
///
/// [`Headers`]: crate::Headers
#[derive(Debug, Clone)]
pub struct Name(Repr);

#[derive(Debug, Clone)]
enum Repr {
    Known(&'static str),
    Unknown(BytesStr),
}

impl Name {
    /// Returns a Name for a header not implemented as constant
    pub const fn unknown(name: BytesStr) -> Self {
        Self(Repr::Unknown(name))
    }

    pub fn as_str(&self) -> &str {
        match &self.0 {
            Repr::Known(name) => name,
            Repr::Unknown(name) => name,
        }
    }

    /// Looks up the name of a header found inside a message
    pub fn from_parse(src: &bytes::Bytes, slice: &str) -> Self {
        NAMES
            .iter()
            .find(|(parse, _)| parse.eq_ignore_ascii_case(slice))
            .map(|(_, name)| name.clone())
            .unwrap_or_else(|| Self::unknown(BytesStr::from_parse(src, slice)))
    }

    /// Returns all strings matching this name inside a message
    pub fn as_parse_strs(&self) -> impl Iterator<Item = &str> {
        let print = self.as_str();

        NAMES
            .iter()
            .filter(move |(_, name)| name.as_str().eq_ignore_ascii_case(print))
            .map(|(parse, _)| *parse)
            .chain(std::iter::once(print))
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.as_str().eq_ignore_ascii_case(other.as_str())
    }
}

impl Eq for Name {}

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        self.as_parse_strs().any(|s| s.eq_ignore_ascii_case(other))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Name {
    fn from(name: &str) -> Self {
        let name = BytesStr::from(name);

        Self::from_parse(name.as_ref(), &name)
    }
}

macro_rules! header_names {
    ($($print:literal, $konst:ident, [$($parse:literal),*];)+) => {
        impl Name {
            $(pub const $konst: Name = Name(Repr::Known($print));)+
        }

        static NAMES: &[(&str, Name)] = &[
            $(
            ($print, Name::$konst),
            $(($parse, Name::$konst),)*
            )+
        ];
    };
}

header_names! {
    "Accept",              ACCEPT,              [];
    "Allow",               ALLOW,               [];
    "Authorization",       AUTHORIZATION,       [];
    "Call-ID",             CALL_ID,             ["i"];
    "Contact",             CONTACT,             ["m"];
    "Content-Length",      CONTENT_LENGTH,      ["l"];
    "Content-Type",        CONTENT_TYPE,        ["c"];
    "CSeq",                CSEQ,                [];
    "Expires",             EXPIRES,             [];
    "From",                FROM,                ["f"];
    "Max-Forwards",        MAX_FORWARDS,        [];
    "Min-Expires",         MIN_EXPIRES,         [];
    "Proxy-Authenticate",  PROXY_AUTHENTICATE,  [];
    "Proxy-Authorization", PROXY_AUTHORIZATION, [];
    "Record-Route",        RECORD_ROUTE,        [];
    "Route",               ROUTE,               [];
    "Server",              SERVER,              [];
    "Subject",             SUBJECT,             ["s"];
    "Supported",           SUPPORTED,           ["k"];
    "To",                  TO,                  ["t"];
    "User-Agent",          USER_AGENT,          [];
    "Via",                 VIA,                 ["v"];
    "WWW-Authenticate",    WWW_AUTHENTICATE,    [];
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compact_forms() {
        assert_eq!(Name::from("v"), Name::VIA);
        assert_eq!(Name::from("I"), Name::CALL_ID);
        assert_eq!(Name::from("call-id").to_string(), "Call-ID");
        assert!(Name::CONTENT_LENGTH == *"l");
    }

    #[test]
    fn unknown_name() {
        let name = Name::from("X-Custom");

        assert_eq!(name, Name::from("x-custom"));
        assert_eq!(name.to_string(), "X-Custom");
    }
}
