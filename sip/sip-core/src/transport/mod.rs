use bytes::Bytes;
use sip_types::Headers;
use sip_types::host::HostPort;
use sip_types::msg::{MessageLine, parse_message};
use std::fmt::{Debug, Display};
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;
use std::{fmt, io};

mod codec;
pub mod resolver;
pub mod tcp;
pub mod udp;

/// Abstraction over a transport
#[async_trait::async_trait]
pub trait Transport: Debug + Display + Send + Sync + 'static {
    /// Must return the name of the transport. (e.g. UDP, TCP)
    fn name(&self) -> &'static str;

    /// Checks if the transport is eligible for the transport specified inside an uri.
    fn matches_transport_param(&self, name: &str) -> bool {
        self.name().eq_ignore_ascii_case(name)
    }

    /// Is the transport reliable, changes how retransmissions in transactions are handled.
    fn reliable(&self) -> bool;

    /// The local address of the transport
    fn bound(&self) -> SocketAddr;

    /// The sent-by address of the transport. This address is where peers can reach this endpoint
    /// from. (e.g. the listener address of a tcp transport)
    fn sent_by(&self) -> SocketAddr;

    /// Use the given transport to send `message` to `target`.
    async fn send(&self, message: &[u8], target: SocketAddr) -> io::Result<()>;
}

/// Shared handle to an implementation of [`Transport`]
#[derive(Debug, Clone)]
pub struct TpHandle {
    transport: Arc<dyn Transport>,
}

impl TpHandle {
    pub fn new<T: Transport>(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }
}

impl Deref for TpHandle {
    type Target = dyn Transport;

    fn deref(&self) -> &Self::Target {
        &*self.transport
    }
}

impl PartialEq for TpHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.transport, &other.transport)
    }
}

impl fmt::Display for TpHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.transport, f)
    }
}

/// Information saved for subsequent request to the same target
///
/// Used to save the transport & resolved socket address of an uri.
/// Can also be used to configure the via_host_port if it needs rewriting.
#[derive(Debug, Default, Clone)]
pub struct TargetTransportInfo {
    /// optional host port to use in the via header
    pub via_host_port: Option<HostPort>,

    /// Transport and remote address used to send
    /// requests to. If not set the request-uri
    /// will be used to populate there accordingly.
    pub transport: Option<(TpHandle, SocketAddr)>,
}

/// Events emitted by transports into the channel given on creation
#[derive(Debug)]
pub enum TransportEvent {
    Message(ReceivedMessage),
    ConnectionEstablished {
        transport: &'static str,
        remote: SocketAddr,
    },
    ConnectionClosed {
        transport: &'static str,
        remote: SocketAddr,
        reason: String,
    },
}

/// Complete SIP message received by a transport
#[derive(Debug)]
pub struct ReceivedMessage {
    pub source: SocketAddr,
    pub transport: TpHandle,

    pub line: MessageLine,
    pub headers: Headers,
    pub body: Bytes,
}

impl ReceivedMessage {
    pub(crate) fn parse(
        buffer: Bytes,
        source: SocketAddr,
        transport: &TpHandle,
    ) -> Result<Self, sip_types::msg::ParseError> {
        let message = parse_message(buffer)?;

        Ok(Self {
            source,
            transport: transport.clone(),
            line: message.line,
            headers: message.headers,
            body: message.body,
        })
    }
}

impl fmt::Display for ReceivedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} via {}", self.line, self.source, self.transport)
    }
}

/// Returns true if the buffer only consists of CRLF keep-alive characters
pub(crate) fn is_keep_alive(buffer: &[u8]) -> bool {
    !buffer.is_empty() && buffer.iter().all(|b| matches!(b, b'\r' | b'\n'))
}

#[cfg(test)]
pub(crate) mod mock {
    use super::Transport;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use sip_types::msg::{ParsedMessage, parse_message};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::{fmt, io};

    /// Transport that records everything sent through it
    #[derive(Debug, Clone)]
    pub(crate) struct MockTransport {
        pub(crate) bound: SocketAddr,
        pub(crate) reliable: bool,
        pub(crate) sent: Arc<Mutex<Vec<(SocketAddr, Bytes)>>>,
    }

    impl MockTransport {
        pub(crate) fn new(bound: SocketAddr) -> Self {
            Self {
                bound,
                reliable: false,
                sent: Default::default(),
            }
        }

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
            self.reliable
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
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keep_alive_detection() {
        assert!(is_keep_alive(b"\r\n\r\n"));
        assert!(is_keep_alive(b"\r\n"));
        assert!(!is_keep_alive(b""));
        assert!(!is_keep_alive(b"OPTIONS"));
    }

    #[test]
    fn handle_displays_transport() {
        let transport = mock::MockTransport::new("127.0.0.1:5060".parse().unwrap());
        let handle = TpHandle::new(transport);

        assert_eq!(handle.to_string(), "mock:bound=127.0.0.1:5060");
        assert_eq!(format!("{handle}"), handle.transport.to_string());
    }
}
