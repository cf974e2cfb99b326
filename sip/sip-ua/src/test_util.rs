//! Recording transport and message helpers shared by the state machine tests

use bytes::Bytes;
use parking_lot::Mutex;
use sip_core::transport::{ReceivedMessage, TpHandle, Transport};
use sip_core::{BaseHeaders, Endpoint, IncomingRequest};
use sip_types::Method;
use sip_types::msg::{MessageLine, ParsedMessage, parse_message};
use std::net::SocketAddr;
use std::sync::Arc;
use std::{fmt, io};

pub(crate) const PEER: &str = "127.0.0.1:5070";

#[derive(Debug, Clone)]
pub(crate) struct MockTransport {
    bound: SocketAddr,
    sent: Arc<Mutex<Vec<(SocketAddr, Bytes)>>>,
}

impl MockTransport {
    pub(crate) fn new(bound: SocketAddr) -> Self {
        Self {
            bound,
            sent: Default::default(),
        }
    }

    /// Drain everything sent so far, parsed back into messages
    pub(crate) fn take_sent(&self) -> Vec<ParsedMessage> {
        self.sent
            .lock()
            .drain(..)
            .map(|(_, buffer)| parse_message(buffer).unwrap())
            .collect()
    }
}

impl fmt::Display for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mock:bound={}", self.bound)
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "UDP"
    }

    fn reliable(&self) -> bool {
        false
    }

    fn bound(&self) -> SocketAddr {
        self.bound
    }

    fn sent_by(&self) -> SocketAddr {
        self.bound
    }

    async fn send(&self, message: &[u8], target: SocketAddr) -> io::Result<()> {
        self.sent
            .lock()
            .push((target, Bytes::copy_from_slice(message)));
        Ok(())
    }
}

/// Endpoint with a single mock transport bound to 127.0.0.1:5060
pub(crate) fn endpoint() -> (Endpoint, MockTransport) {
    let mock = MockTransport::new("127.0.0.1:5060".parse().unwrap());

    let mut builder = Endpoint::builder();
    builder
        .add_allow(Method::INVITE)
        .add_allow(Method::BYE)
        .add_allow(Method::OPTIONS)
        .add_allow(Method::REGISTER)
        .add_transport(TpHandle::new(mock.clone()));

    (builder.build(), mock)
}

/// Message as if it was received from [`PEER`] on the endpoint's transport
pub(crate) fn received_message(endpoint: &Endpoint, raw: impl Into<Bytes>) -> ReceivedMessage {
    let parsed = parse_message(raw.into()).unwrap();

    ReceivedMessage {
        source: PEER.parse().unwrap(),
        transport: endpoint.transports()[0].clone(),
        line: parsed.line,
        headers: parsed.headers,
        body: parsed.body,
    }
}

/// Request built without passing through the endpoint's transactions
pub(crate) fn received_request(endpoint: &Endpoint, raw: &'static str) -> IncomingRequest {
    let message = received_message(endpoint, raw);

    let MessageLine::Request(line) = message.line else {
        panic!("expected a request");
    };

    let base_headers = BaseHeaders::extract_from(&message.headers).unwrap();

    IncomingRequest {
        source: message.source,
        transport: message.transport,
        tsx_key: sip_core::transaction::TsxKey::server(
            base_headers.top_via().branch().unwrap().clone(),
            line.method.clone(),
        ),
        line,
        base_headers,
        headers: message.headers,
        body: message.body,
    }
}

/// Turn a sent request into the raw text of a response with `code`, copying the
/// transaction headers and adding `extra` headers and `body`
pub(crate) fn response_to(sent: &ParsedMessage, code: u16, extra: &str, body: &str) -> Bytes {
    use sip_types::Name;

    let mut raw = format!("SIP/2.0 {code} Whatever\r\n");

    for name in [Name::VIA, Name::FROM, Name::TO, Name::CALL_ID, Name::CSEQ] {
        for value in sent.headers.get_all(&name) {
            if name == Name::TO && code > 100 && !value.contains("tag=") {
                raw.push_str(&format!("{name}: {value};tag=peer\r\n"));
            } else {
                raw.push_str(&format!("{name}: {value}\r\n"));
            }
        }
    }

    raw.push_str(extra);

    if !body.is_empty() {
        raw.push_str("Content-Type: application/sdp\r\n");
    }

    raw.push_str(&format!("Content-Length: {}\r\n\r\n{body}", body.len()));

    Bytes::from(raw)
}

/// Minimal SDP of a peer at 127.0.0.1 offering or answering `formats`
pub(crate) fn peer_sdp(port: u16, formats: &[u8]) -> String {
    let fmts = formats
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "v=0\r\n\
        o=- 1 1 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        c=IN IP4 127.0.0.1\r\n\
        t=0 0\r\n\
        m=audio {port} RTP/AVP {fmts}\r\n"
    )
}

pub(crate) fn request_line(message: &ParsedMessage) -> &sip_types::msg::RequestLine {
    match &message.line {
        MessageLine::Request(line) => line,
        MessageLine::Response(line) => panic!("expected request, got {line}"),
    }
}

pub(crate) fn status_code(message: &ParsedMessage) -> u16 {
    match &message.line {
        MessageLine::Response(line) => line.code.into_u16(),
        MessageLine::Request(line) => panic!("expected response, got {line}"),
    }
}
