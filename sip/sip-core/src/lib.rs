//! Transport and transaction layer of the sipua stack
//!
//! Everything in here is driven by a single owner: transports push
//! [`TransportEvent`](transport::TransportEvent)s into a channel, the owner hands them to
//! [`Endpoint::receive`] and polls [`Endpoint::timeout`] / [`Endpoint::poll_timeouts`]
//! for retransmissions. No task is spawned for transactions and nothing is shared
//! between threads, which lets the user agent run on a single threaded event loop.

use bytes::Bytes;
use sip_types::header::HeaderError;
use sip_types::header::typed::{CSeq, CallId, FromTo, Via};
use sip_types::msg::{MessageLine, RequestLine, StatusLine, print_message};
use sip_types::uri::SipUri;
use sip_types::{Headers, Method, Name};
use std::fmt;
use std::net::SocketAddr;
use transaction::TsxKey;
use transport::TpHandle;

mod endpoint;
mod error;
pub mod transaction;
pub mod transport;

pub use endpoint::{Endpoint, EndpointBuilder, EndpointEvent};
pub use error::{Error, Result};

/// Basic Response
#[derive(Debug, Clone)]
pub struct Response {
    pub line: StatusLine,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    pub fn to_bytes(&self) -> Bytes {
        print_message(
            &MessageLine::Response(self.line.clone()),
            &self.headers,
            &self.body,
        )
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.line.fmt(f)
    }
}

/// Basic request
#[derive(Debug, Clone)]
pub struct Request {
    pub line: RequestLine,
    pub headers: Headers,
    pub body: Bytes,
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.line.fmt(f)
    }
}

impl Request {
    /// Create an empty request
    pub fn new(method: Method, uri: SipUri) -> Self {
        Self {
            line: RequestLine { method, uri },
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        print_message(
            &MessageLine::Request(self.line.clone()),
            &self.headers,
            &self.body,
        )
    }
}

/// Parsed SIP headers that are part of every message
#[derive(Debug, Clone)]
pub struct BaseHeaders {
    /// All via headers, guaranteed to not be empty
    pub via: Vec<Via>,
    pub from: FromTo,
    pub to: FromTo,
    pub call_id: CallId,
    pub cseq: CSeq,
}

impl BaseHeaders {
    pub fn extract_from(headers: &Headers) -> Result<Self, HeaderError> {
        let via: Vec<Via> = headers.get_all_named()?;

        if via.is_empty() {
            return Err(HeaderError::Missing(Name::VIA));
        }

        Ok(BaseHeaders {
            via,
            from: headers.get_type(&Name::FROM)?,
            to: headers.get_type(&Name::TO)?,
            call_id: headers.get_named()?,
            cseq: headers.get_named()?,
        })
    }

    /// The top most via header
    pub fn top_via(&self) -> &Via {
        &self.via[0]
    }
}

/// Request received by the endpoint, passed upwards by [`EndpointEvent::Request`]
#[derive(Debug)]
pub struct IncomingRequest {
    pub source: SocketAddr,
    pub transport: TpHandle,
    pub tsx_key: TsxKey,

    pub line: RequestLine,
    pub base_headers: BaseHeaders,
    pub headers: Headers,
    pub body: Bytes,
}

impl fmt::Display for IncomingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.line.fmt(f)
    }
}

impl IncomingRequest {
    /// Make a clone of the request data
    pub fn clone_request(&self) -> Request {
        Request {
            line: self.line.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// Response received inside a client transaction
#[derive(Debug, Clone)]
pub struct TsxResponse {
    pub source: SocketAddr,

    pub line: StatusLine,
    pub base_headers: BaseHeaders,
    pub headers: Headers,
    pub body: Bytes,
}

impl fmt::Display for TsxResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.line.fmt(f)
    }
}
