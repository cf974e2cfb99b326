use super::consts::{T1, T2, T4};
use super::{Fired, Retransmit, earliest};
use crate::Response;
use crate::transport::TpHandle;
use bytes::Bytes;
use sip_types::header::typed::CallId;
use sip_types::{CodeKind, Method};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Nothing or only provisional responses sent
    Proceeding,
    /// INVITE answered with 2xx, retransmitting until the ACK arrives
    Accepted,
    /// Final non-2xx response sent
    Completed,
    /// ACK for a non-2xx received
    Confirmed,
}

/// Server transaction for INVITE and non-INVITE requests.
///
/// The 2xx retransmission of INVITE requests, which is a duty of the UAS core, is
/// also handled here to keep every timer in one place.
#[derive(Debug)]
pub(crate) struct ServerTsx {
    method: Method,
    call_id: CallId,
    cseq: u32,

    transport: TpHandle,
    destination: SocketAddr,

    state: State,
    response: Option<Bytes>,
    retransmit: Option<Retransmit>,
    timeout: Option<Instant>,
    terminate_at: Option<Instant>,
}

impl ServerTsx {
    pub(crate) fn new(
        method: Method,
        call_id: CallId,
        cseq: u32,
        transport: TpHandle,
        destination: SocketAddr,
    ) -> Self {
        Self {
            method,
            call_id,
            cseq,
            transport,
            destination,
            state: State::Proceeding,
            response: None,
            retransmit: None,
            timeout: None,
            terminate_at: None,
        }
    }

    fn is_invite(&self) -> bool {
        self.method == Method::INVITE
    }

    pub(crate) fn timeout(&self) -> Option<Instant> {
        earliest([
            self.retransmit.map(|r| r.at),
            self.timeout,
            self.terminate_at,
        ])
    }

    pub(crate) fn lingering(&self) -> bool {
        match self.state {
            State::Proceeding | State::Accepted => false,
            State::Completed => !self.is_invite(),
            State::Confirmed => true,
        }
    }

    pub(crate) fn has_final_response(&self) -> bool {
        self.state != State::Proceeding
    }

    pub(crate) fn awaits_ack_for(&self, call_id: &CallId, cseq: u32) -> bool {
        self.state == State::Accepted && self.call_id == *call_id && self.cseq == cseq
    }

    /// Send a response inside this transaction
    pub(crate) async fn respond(&mut self, response: &Response, now: Instant) -> io::Result<()> {
        let buffer = response.to_bytes();

        self.transport.send(&buffer, self.destination).await?;

        log::trace!("Sent {} for {} to {}", response.line, self.method, self.destination);

        self.response = Some(buffer);

        let kind = response.line.code.kind();

        match kind {
            CodeKind::Provisional => {}
            CodeKind::Success if self.is_invite() => {
                self.state = State::Accepted;
                self.retransmit = Some(Retransmit::new(now, T1, Some(T2)));
                self.timeout = Some(now + T1 * 64);
            }
            _ if self.is_invite() => {
                self.state = State::Completed;

                if !self.transport.reliable() {
                    // Timer G
                    self.retransmit = Some(Retransmit::new(now, T1, Some(T2)));
                }

                // Timer H
                self.timeout = Some(now + T1 * 64);
            }
            _ => {
                self.state = State::Completed;

                // Timer J
                let linger = if self.transport.reliable() {
                    Duration::ZERO
                } else {
                    T1 * 64
                };

                self.terminate_at = Some(now + linger);
            }
        }

        Ok(())
    }

    /// The request was received again, repeat the last response
    pub(crate) async fn retransmit_response(&self) {
        let Some(response) = &self.response else {
            return;
        };

        if let Err(e) = self.transport.send(response, self.destination).await {
            log::warn!("Failed to resend response to {}, {e}", self.destination);
        }
    }

    /// ACK inside the transaction, only valid after a non-2xx final response.
    ///
    /// Returns if the ACK was absorbed by the transaction.
    pub(crate) fn on_ack(&mut self, now: Instant) -> bool {
        match self.state {
            State::Completed if self.is_invite() => {
                self.state = State::Confirmed;
                self.retransmit = None;
                self.timeout = None;

                // Timer I
                let linger = if self.transport.reliable() {
                    Duration::ZERO
                } else {
                    T4
                };

                self.terminate_at = Some(now + linger);

                true
            }
            State::Confirmed => true,
            _ => false,
        }
    }

    pub(crate) async fn on_timeout(&mut self, now: Instant) -> Fired {
        if self.terminate_at.is_some_and(|at| at <= now) {
            return Fired::Terminated;
        }

        if self.timeout.is_some_and(|at| at <= now) {
            return match self.state {
                State::Accepted => Fired::TimedOut,
                _ => {
                    log::warn!(
                        "No ACK received for final response to {} from {}",
                        self.method,
                        self.destination
                    );
                    Fired::Terminated
                }
            };
        }

        if let Some(retransmit) = &mut self.retransmit {
            if retransmit.at <= now {
                retransmit.next(now);
                self.retransmit_response().await;
            }
        }

        Fired::Pending
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::mock::MockTransport;
    use sip_types::msg::StatusLine;
    use sip_types::{Headers, StatusCode};

    fn response(code: StatusCode) -> Response {
        Response {
            line: StatusLine { code, reason: None },
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    fn invite_tsx(mock: &MockTransport) -> ServerTsx {
        ServerTsx::new(
            Method::INVITE,
            CallId::new("call-1"),
            1,
            TpHandle::new(mock.clone()),
            "127.0.0.1:5070".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn accepted_retransmits_until_ack_timeout() {
        let mock = MockTransport::new("127.0.0.1:5060".parse().unwrap());
        let start = Instant::now();
        let mut tsx = invite_tsx(&mock);

        tsx.respond(&response(StatusCode::OK), start).await.unwrap();
        assert_eq!(mock.take_sent().len(), 1);
        assert!(tsx.awaits_ack_for(&CallId::new("call-1"), 1));
        assert!(!tsx.awaits_ack_for(&CallId::new("call-1"), 2));

        assert_eq!(tsx.on_timeout(start + T1).await, Fired::Pending);
        assert_eq!(mock.take_sent().len(), 1);

        assert_eq!(tsx.on_timeout(start + T1 * 64).await, Fired::TimedOut);
    }

    #[tokio::test]
    async fn non_2xx_confirmed_by_ack() {
        let mock = MockTransport::new("127.0.0.1:5060".parse().unwrap());
        let start = Instant::now();
        let mut tsx = invite_tsx(&mock);

        tsx.respond(&response(StatusCode::BUSY_HERE), start)
            .await
            .unwrap();
        assert!(!tsx.lingering());

        assert!(tsx.on_ack(start));
        assert!(tsx.lingering());
        assert_eq!(tsx.timeout(), Some(start + T4));
        assert_eq!(tsx.on_timeout(start + T4).await, Fired::Terminated);
    }

    #[tokio::test]
    async fn request_retransmission_repeats_response() {
        let mock = MockTransport::new("127.0.0.1:5060".parse().unwrap());
        let start = Instant::now();
        let mut tsx = ServerTsx::new(
            Method::BYE,
            CallId::new("call-1"),
            2,
            TpHandle::new(mock.clone()),
            "127.0.0.1:5070".parse().unwrap(),
        );

        tsx.retransmit_response().await;
        assert!(mock.take_sent().is_empty());

        tsx.respond(&response(StatusCode::OK), start).await.unwrap();
        tsx.retransmit_response().await;
        assert_eq!(mock.take_sent().len(), 2);
        assert!(tsx.lingering());
    }
}
