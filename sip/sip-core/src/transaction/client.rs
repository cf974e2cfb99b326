use super::consts::{T1, T2, T4};
use super::{Fired, Retransmit, earliest};
use crate::transport::TpHandle;
use crate::{Request, TsxResponse};
use bytes::Bytes;
use sip_types::header::typed::{CSeq, MaxForwards};
use sip_types::{CodeKind, Method, Name};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// How long a completed INVITE transaction absorbs retransmitted final responses (Timer D)
const TIMER_D: Duration = Duration::from_secs(32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Request sent, nothing received yet (Calling / Trying)
    Sent,
    Proceeding,
    Completed,
    /// INVITE got a 2xx, further 2xx are handed to the user agent for re-ACKing
    Accepted,
}

/// Client transaction for INVITE and non-INVITE requests
#[derive(Debug)]
pub(crate) struct ClientTsx {
    request: Request,
    buffer: Bytes,

    transport: TpHandle,
    destination: SocketAddr,

    state: State,
    retransmit: Option<Retransmit>,
    timeout: Option<Instant>,
    terminate_at: Option<Instant>,

    ack: Option<Bytes>,
}

impl ClientTsx {
    /// Create the transaction for a request that was just sent
    pub(crate) fn new(
        request: Request,
        buffer: Bytes,
        transport: TpHandle,
        destination: SocketAddr,
        now: Instant,
    ) -> Self {
        let retransmit = if transport.reliable() {
            None
        } else if request.line.method == Method::INVITE {
            // Timer A
            Some(Retransmit::new(now, T1, None))
        } else {
            // Timer E
            Some(Retransmit::new(now, T1, Some(T2)))
        };

        Self {
            request,
            buffer,
            transport,
            destination,
            state: State::Sent,
            retransmit,
            // Timer B / Timer F
            timeout: Some(now + T1 * 64),
            terminate_at: None,
            ack: None,
        }
    }

    fn is_invite(&self) -> bool {
        self.request.line.method == Method::INVITE
    }

    pub(crate) fn request(&self) -> &Request {
        &self.request
    }

    pub(crate) fn transport(&self) -> (&TpHandle, SocketAddr) {
        (&self.transport, self.destination)
    }

    pub(crate) fn timeout(&self) -> Option<Instant> {
        earliest([
            self.retransmit.map(|r| r.at),
            self.timeout,
            self.terminate_at,
        ])
    }

    /// Only absorbing retransmissions, nothing to wait for
    pub(crate) fn lingering(&self) -> bool {
        matches!(self.state, State::Completed | State::Accepted)
    }

    /// Feed a response into the transaction.
    ///
    /// Returns if the response must be passed on to the user agent.
    pub(crate) async fn receive(&mut self, response: &TsxResponse, now: Instant) -> bool {
        let kind = response.line.code.kind();

        match (self.state, kind) {
            (State::Sent | State::Proceeding, CodeKind::Provisional) => {
                self.state = State::Proceeding;

                if self.is_invite() {
                    // Timer A stops once anything is received
                    self.retransmit = None;
                    // Timer B only covers the calling state
                    self.timeout = None;
                } else if let Some(retransmit) = &mut self.retransmit {
                    retransmit.interval = T2;
                }

                true
            }
            (State::Sent | State::Proceeding, CodeKind::Success) if self.is_invite() => {
                self.state = State::Accepted;
                self.retransmit = None;
                self.timeout = None;
                // Timer M
                self.terminate_at = Some(now + T1 * 64);

                true
            }
            (State::Sent | State::Proceeding, _) => {
                self.state = State::Completed;
                self.retransmit = None;
                self.timeout = None;

                if self.is_invite() {
                    let ack = self.create_ack(response);
                    self.send_ack(ack).await;
                }

                let linger = match (self.transport.reliable(), self.is_invite()) {
                    (true, _) => Duration::ZERO,
                    (false, true) => TIMER_D,
                    (false, false) => T4,
                };

                self.terminate_at = Some(now + linger);

                true
            }
            (State::Completed, _) => {
                // retransmitted final response
                if let Some(ack) = self.ack.clone() {
                    self.send_ack(ack).await;
                }

                false
            }
            (State::Accepted, CodeKind::Success) => true,
            (State::Accepted, _) => false,
        }
    }

    /// Fire the transaction's deadline
    pub(crate) async fn on_timeout(&mut self, now: Instant) -> Fired {
        if self.terminate_at.is_some_and(|at| at <= now) {
            return Fired::Terminated;
        }

        if self.timeout.is_some_and(|at| at <= now) {
            log::debug!(
                "{} to {} timed out",
                self.request.line.method,
                self.destination
            );
            return Fired::TimedOut;
        }

        if let Some(retransmit) = &mut self.retransmit {
            if retransmit.at <= now {
                retransmit.next(now);

                log::trace!("Retransmitting {}", self.request.line);

                if let Err(e) = self.transport.send(&self.buffer, self.destination).await {
                    log::warn!("Failed to retransmit {}, {e}", self.request.line);
                }
            }
        }

        Fired::Pending
    }

    /// ACK for a non-2xx final response, sent within the INVITE transaction (RFC 3261 17.1.1.3)
    fn create_ack(&mut self, response: &TsxResponse) -> Bytes {
        let mut ack = Request::new(Method::ACK, self.request.line.uri.clone());

        // the single Via of the original request, same branch
        if let Some(via) = self.request.headers.get(&Name::VIA) {
            ack.headers.insert(Name::VIA, via.clone());
        }

        ack.headers.insert_named(&MaxForwards(70));
        ack.headers.copy_from(&self.request.headers, &Name::FROM);
        ack.headers.insert_type(Name::TO, &response.base_headers.to);
        ack.headers.copy_from(&self.request.headers, &Name::CALL_ID);
        ack.headers
            .insert_named(&CSeq::new(response.base_headers.cseq.cseq, Method::ACK));
        ack.headers.copy_from(&self.request.headers, &Name::ROUTE);

        let buffer = ack.to_bytes();
        self.ack = Some(buffer.clone());
        buffer
    }

    async fn send_ack(&self, ack: Bytes) {
        if let Err(e) = self.transport.send(&ack, self.destination).await {
            log::warn!("Failed to send ACK to {}, {e}", self.destination);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::BaseHeaders;
    use crate::transport::mock::MockTransport;
    use sip_types::Headers;
    use sip_types::header::typed::Via;
    use sip_types::msg::{MessageLine, StatusLine};
    use sip_types::StatusCode;

    fn invite() -> Request {
        let mut request = Request::new(Method::INVITE, "sip:bob@127.0.0.1".parse().unwrap());
        request.headers.insert(
            Name::VIA,
            "SIP/2.0/UDP 127.0.0.1:5060;branch=z9hG4bKclient",
        );
        request.headers.insert(Name::FROM, "<sip:alice@127.0.0.1>;tag=a");
        request.headers.insert(Name::TO, "<sip:bob@127.0.0.1>");
        request.headers.insert(Name::CALL_ID, "call-1");
        request.headers.insert(Name::CSEQ, "1 INVITE");
        request
    }

    fn response(code: u16) -> TsxResponse {
        let mut headers = Headers::new();
        headers.insert(
            Name::VIA,
            "SIP/2.0/UDP 127.0.0.1:5060;branch=z9hG4bKclient",
        );
        headers.insert(Name::FROM, "<sip:alice@127.0.0.1>;tag=a");
        headers.insert(Name::TO, "<sip:bob@127.0.0.1>;tag=b");
        headers.insert(Name::CALL_ID, "call-1");
        headers.insert(Name::CSEQ, "1 INVITE");

        TsxResponse {
            source: "127.0.0.1:5070".parse().unwrap(),
            line: StatusLine {
                code: StatusCode::from(code),
                reason: None,
            },
            base_headers: BaseHeaders::extract_from(&headers).unwrap(),
            headers,
            body: Bytes::new(),
        }
    }

    fn tsx(mock: &MockTransport, now: Instant) -> ClientTsx {
        let request = invite();
        let buffer = request.to_bytes();

        ClientTsx::new(
            request,
            buffer,
            TpHandle::new(mock.clone()),
            "127.0.0.1:5070".parse().unwrap(),
            now,
        )
    }

    #[tokio::test]
    async fn timer_a_doubles_until_provisional() {
        let mock = MockTransport::new("127.0.0.1:5060".parse().unwrap());
        let start = Instant::now();
        let mut tsx = tsx(&mock, start);

        assert_eq!(tsx.timeout(), Some(start + T1));
        assert_eq!(tsx.on_timeout(start + T1).await, Fired::Pending);
        assert_eq!(tsx.timeout(), Some(start + T1 + T1 * 2));
        assert_eq!(mock.take_sent().len(), 1);

        assert!(tsx.receive(&response(180), start + T1 * 2).await);
        assert_eq!(tsx.timeout(), None);
        assert!(!tsx.lingering());
    }

    #[tokio::test]
    async fn timer_b_times_out() {
        let mock = MockTransport::new("127.0.0.1:5060".parse().unwrap());
        let start = Instant::now();
        let mut tsx = tsx(&mock, start);

        assert_eq!(tsx.on_timeout(start + T1 * 64).await, Fired::TimedOut);
    }

    #[tokio::test]
    async fn non_2xx_is_acked_by_transaction() {
        let mock = MockTransport::new("127.0.0.1:5060".parse().unwrap());
        let start = Instant::now();
        let mut tsx = tsx(&mock, start);

        assert!(tsx.receive(&response(486), start).await);
        assert!(tsx.lingering());

        let sent = mock.take_sent();
        assert_eq!(sent.len(), 1);

        let MessageLine::Request(line) = &sent[0].line else {
            panic!("expected ACK")
        };
        assert_eq!(line.method, Method::ACK);

        let via: Via = sent[0].headers.get_named().unwrap();
        assert_eq!(via.branch().unwrap(), "z9hG4bKclient");

        let cseq: CSeq = sent[0].headers.get_named().unwrap();
        assert_eq!(cseq.method, Method::ACK);

        // retransmitted 486 is absorbed but ACKed again
        assert!(!tsx.receive(&response(486), start).await);
        assert_eq!(mock.take_sent().len(), 1);

        assert_eq!(tsx.on_timeout(start + TIMER_D).await, Fired::Terminated);
    }

    #[tokio::test]
    async fn duplicate_2xx_passed_up() {
        let mock = MockTransport::new("127.0.0.1:5060".parse().unwrap());
        let start = Instant::now();
        let mut tsx = tsx(&mock, start);

        assert!(tsx.receive(&response(200), start).await);
        assert!(tsx.receive(&response(200), start).await);
        assert!(!tsx.receive(&response(180), start).await);

        // the transaction itself never ACKs a 2xx
        assert!(mock.take_sent().is_empty());
    }
}
