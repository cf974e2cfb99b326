//! Start lines, complete message parsing and printing

use crate::code::StatusCode;
use crate::header::Headers;
use crate::header::name::Name;
use crate::method::Method;
use crate::parse::{IResult, Parse};
use crate::uri::SipUri;
use bytes::{Bytes, BytesMut};
use bytesstr::BytesStr;
use memchr::memmem;
use nom::bytes::complete::tag_no_case;
use nom::character::complete::{char, digit1, space1};
use nom::combinator::{map, map_res, opt, rest};
use nom::sequence::{preceded, tuple};
use std::fmt;
use std::fmt::Write as _;
use std::str::from_utf8;

const SIP_VERSION: &str = "SIP/2.0";
const HEAD_END: &[u8] = b"\r\n\r\n";

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("message head is incomplete")]
    Incomplete,
    #[error("message head is not valid utf-8")]
    Utf8,
    #[error("invalid start line {0:?}")]
    StartLine(String),
    #[error("invalid header line {0:?}")]
    HeaderLine(String),
    #[error("invalid content-length")]
    ContentLength,
    #[error("body is shorter than content-length")]
    TruncatedBody,
}

/// `Method Request-URI SIP/2.0`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub uri: SipUri,
}

impl Parse for RequestLine {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            map(
                tuple((
                    Method::parse(src),
                    space1,
                    SipUri::parse(src),
                    space1,
                    tag_no_case(SIP_VERSION),
                )),
                |(method, _, uri, _, _)| RequestLine { method, uri },
            )(i)
        }
    }
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {SIP_VERSION}", self.method, self.uri)
    }
}

/// `SIP/2.0 Status-Code Reason-Phrase`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub code: StatusCode,
    pub reason: Option<BytesStr>,
}

impl StatusLine {
    /// The reason phrase, falling back to the default text of the code
    pub fn reason_text(&self) -> &str {
        match &self.reason {
            Some(reason) => &**reason,
            None => self.code.text().unwrap_or_default(),
        }
    }
}

impl Parse for StatusLine {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            map(
                tuple((
                    tag_no_case(SIP_VERSION),
                    space1,
                    map_res(digit1, str::parse::<u16>),
                    opt(preceded(char(' '), rest)),
                )),
                |(_, _, code, reason): (_, _, u16, Option<&str>)| StatusLine {
                    code: StatusCode::from(code),
                    reason: reason
                        .map(str::trim)
                        .filter(|reason| !reason.is_empty())
                        .map(|reason| BytesStr::from_parse(src, reason)),
                },
            )(i)
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SIP_VERSION} {} {}", self.code, self.reason_text())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageLine {
    Request(RequestLine),
    Response(StatusLine),
}

impl MessageLine {
    pub fn is_request(&self) -> bool {
        matches!(self, MessageLine::Request(_))
    }

    fn parse_line(src: &Bytes, line: &str) -> Result<Self, ParseError> {
        let is_response = line
            .get(..SIP_VERSION.len())
            .is_some_and(|version| version.eq_ignore_ascii_case(SIP_VERSION));

        let parsed = if is_response {
            StatusLine::parse(src)(line).map(|(rem, l)| (rem, MessageLine::Response(l)))
        } else {
            RequestLine::parse(src)(line).map(|(rem, l)| (rem, MessageLine::Request(l)))
        };

        match parsed {
            Ok((rem, line)) if rem.trim().is_empty() => Ok(line),
            _ => Err(ParseError::StartLine(line.into())),
        }
    }
}

impl fmt::Display for MessageLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageLine::Request(line) => line.fmt(f),
            MessageLine::Response(line) => line.fmt(f),
        }
    }
}

/// A complete message split into its parts
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub line: MessageLine,
    pub headers: Headers,
    pub body: Bytes,
}

/// Parses a complete message, e.g. the content of a single datagram.
///
/// The body is cut to the length given by `Content-Length` if present.
pub fn parse_message(src: Bytes) -> Result<ParsedMessage, ParseError> {
    let head_end = memmem::find(&src, HEAD_END).ok_or(ParseError::Incomplete)?;

    let head = from_utf8(&src[..head_end]).map_err(|_| ParseError::Utf8)?;

    let mut lines = unfold_lines(head).into_iter();

    let start = lines.next().ok_or(ParseError::Incomplete)?;
    let line = MessageLine::parse_line(&src, &start)?;

    let mut headers = Headers::new();

    for header_line in lines {
        let (name, value) = header_line
            .split_once(':')
            .ok_or_else(|| ParseError::HeaderLine(header_line.to_string()))?;

        let name = name.trim();

        if name.is_empty() || !name.chars().all(crate::parse::token) {
            return Err(ParseError::HeaderLine(header_line.to_string()));
        }

        let name = src_slice(&src, head, name);

        headers.insert(
            Name::from_parse(name.as_ref(), &name),
            src_slice(&src, head, value.trim()),
        );
    }

    let body_start = head_end + HEAD_END.len();
    let available = src.len() - body_start;

    let body_len = match headers.get(&Name::CONTENT_LENGTH) {
        Some(len) => {
            let len: usize = len.trim().parse().map_err(|_| ParseError::ContentLength)?;

            if len > available {
                return Err(ParseError::TruncatedBody);
            }

            len
        }
        None => available,
    };

    Ok(ParsedMessage {
        line,
        headers,
        body: src.slice(body_start..body_start + body_len),
    })
}

/// A header line which is either borrowed from the head or joined from folded lines
enum HeadLine<'h> {
    Borrowed(&'h str),
    Folded(String),
}

impl std::ops::Deref for HeadLine<'_> {
    type Target = str;

    fn deref(&self) -> &str {
        match self {
            HeadLine::Borrowed(line) => line,
            HeadLine::Folded(line) => line,
        }
    }
}

impl fmt::Display for HeadLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self)
    }
}

fn unfold_lines(head: &str) -> Vec<HeadLine<'_>> {
    let mut lines: Vec<HeadLine<'_>> = Vec::new();

    for line in head.split("\r\n").flat_map(|l| l.split('\n')) {
        if line.starts_with([' ', '\t']) {
            if let Some(last) = lines.last_mut() {
                let mut joined = last.to_string();
                joined.push(' ');
                joined.push_str(line.trim());
                *last = HeadLine::Folded(joined);
                continue;
            }
        }

        if !line.is_empty() {
            lines.push(HeadLine::Borrowed(line));
        }
    }

    lines
}

/// Returns a [`BytesStr`] referencing `src` if `slice` is part of `head`, else copies it
fn src_slice(src: &Bytes, head: &str, slice: &str) -> BytesStr {
    let head_range = head.as_ptr() as usize..head.as_ptr() as usize + head.len();

    if head_range.contains(&(slice.as_ptr() as usize)) || slice.is_empty() {
        BytesStr::from_parse(src, slice)
    } else {
        BytesStr::from(slice)
    }
}

/// Returns the length of the first complete message inside `buf`.
///
/// Used to frame messages on stream transports, `None` means more data is required.
pub fn message_length(buf: &[u8]) -> Result<Option<usize>, ParseError> {
    let Some(head_end) = memmem::find(buf, HEAD_END) else {
        return Ok(None);
    };

    let head = from_utf8(&buf[..head_end]).map_err(|_| ParseError::Utf8)?;

    let mut content_length = 0;

    for line in head.split("\r\n").skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };

        if Name::CONTENT_LENGTH == *name.trim() {
            content_length = value
                .trim()
                .parse::<usize>()
                .map_err(|_| ParseError::ContentLength)?;
        }
    }

    let total = head_end + HEAD_END.len() + content_length;

    Ok((buf.len() >= total).then_some(total))
}

/// Prints a message, `Content-Length` is always set to the length of `body`
pub fn print_message(line: &MessageLine, headers: &Headers, body: &[u8]) -> Bytes {
    let mut head = String::with_capacity(512);

    let _ = write!(head, "{line}\r\n");

    for (name, value) in headers.iter() {
        if *name != Name::CONTENT_LENGTH {
            let _ = write!(head, "{name}: {value}\r\n");
        }
    }

    let _ = write!(head, "{}: {}\r\n\r\n", Name::CONTENT_LENGTH, body.len());

    let mut buf = BytesMut::with_capacity(head.len() + body.len());
    buf.extend_from_slice(head.as_bytes());
    buf.extend_from_slice(body);
    buf.freeze()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::header::typed::{CSeq, Via};

    const INVITE: &str = "INVITE sip:bob@biloxi.com SIP/2.0\r\n\
        Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds\r\n\
        Max-Forwards: 70\r\n\
        To: Bob <sip:bob@biloxi.com>\r\n\
        From: Alice <sip:alice@atlanta.com>;tag=1928301774\r\n\
        i: a84b4c76e66710@pc33.atlanta.com\r\n\
        CSeq: 314159 INVITE\r\n\
        Subject: long\r\n  folded\r\n\
        Content-Type: application/sdp\r\n\
        Content-Length: 4\r\n\
        \r\n\
        v=0\r\n";

    #[test]
    fn parse_request() {
        let msg = parse_message(Bytes::from_static(INVITE.as_bytes())).unwrap();

        let MessageLine::Request(line) = &msg.line else {
            panic!("expected request");
        };

        assert_eq!(line.method, Method::INVITE);
        assert_eq!(line.uri.user.as_deref(), Some("bob"));

        let via: Via = msg.headers.get_named().unwrap();
        assert_eq!(via.branch().unwrap(), "z9hG4bK776asdhds");

        let cseq: CSeq = msg.headers.get_named().unwrap();
        assert_eq!(cseq.cseq, 314159);

        assert_eq!(
            msg.headers.get(&Name::CALL_ID).unwrap(),
            "a84b4c76e66710@pc33.atlanta.com"
        );
        assert_eq!(msg.headers.get(&Name::SUBJECT).unwrap(), "long folded");

        // content-length cuts the trailing CRLF
        assert_eq!(&msg.body[..], b"v=0\r");
    }

    #[test]
    fn parse_response() {
        let msg = parse_message(Bytes::from_static(
            b"SIP/2.0 486 Busy Here\r\nCSeq: 1 INVITE\r\n\r\n",
        ))
        .unwrap();

        let MessageLine::Response(line) = &msg.line else {
            panic!("expected response");
        };

        assert_eq!(line.code, StatusCode::BUSY_HERE);
        assert_eq!(line.reason_text(), "Busy Here");
        assert!(msg.body.is_empty());
    }

    #[test]
    fn reject_garbage() {
        assert!(matches!(
            parse_message(Bytes::from_static(b"HELLO\r\n\r\n")),
            Err(ParseError::StartLine(_))
        ));
        assert!(matches!(
            parse_message(Bytes::from_static(b"SIP/2.0 200 OK\r\nVia")),
            Err(ParseError::Incomplete)
        ));
        assert!(matches!(
            parse_message(Bytes::from_static(
                b"SIP/2.0 200 OK\r\nContent-Length: 10\r\n\r\nabc"
            )),
            Err(ParseError::TruncatedBody)
        ));
    }

    #[test]
    fn stream_framing() {
        let msg = b"SIP/2.0 200 OK\r\nl: 3\r\n\r\nabcSIP/2.0";

        assert_eq!(message_length(&msg[..10]).unwrap(), None);
        assert_eq!(message_length(&msg[..26]).unwrap(), None);
        assert_eq!(message_length(msg).unwrap(), Some(27));
    }

    #[test]
    fn print_sets_content_length() {
        let mut headers = Headers::new();
        headers.insert(Name::CALL_ID, "abc");
        headers.insert(Name::CONTENT_LENGTH, "999");

        let line = MessageLine::Response(StatusLine {
            code: StatusCode::OK,
            reason: None,
        });

        let printed = print_message(&line, &headers, b"body");

        assert_eq!(
            &printed[..],
            b"SIP/2.0 200 OK\r\nCall-ID: abc\r\nContent-Length: 4\r\n\r\nbody"
        );
    }
}
