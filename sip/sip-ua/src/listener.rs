use crate::CallContext;
use crate::call::{CallEvent, CallSession};
use sip_auth::ClientAuthenticator;
use sip_core::IncomingRequest;
use sip_types::{Method, StatusCode};

/// Answers out-of-dialog requests and admits at most one inbound call at a time.
#[derive(Debug)]
pub struct SessionListener {
    accepting: bool,
}

impl Default for SessionListener {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionListener {
    pub fn new() -> Self {
        Self { accepting: true }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    /// Once disabled new INVITEs are answered with 503
    pub fn set_accepting(&mut self, accepting: bool) {
        self.accepting = accepting;
    }

    /// Handle a request that matches no existing call.
    ///
    /// An accepted call is stored in `slot`, an occupied slot turns any new INVITE away
    /// with 486.
    pub async fn on_incoming_request<A>(
        &self,
        ctx: &mut CallContext<'_>,
        request: IncomingRequest,
        slot: &mut Option<CallSession<A>>,
    ) -> Option<CallEvent>
    where
        A: ClientAuthenticator,
    {
        let method = request.line.method.clone();

        if method == Method::ACK {
            log::debug!("Dropping ACK outside of any call");
            return None;
        }

        if method != Method::INVITE || request.base_headers.to.tag.is_some() {
            self.reply(ctx, &request, StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST, None)
                .await;
            return None;
        }

        let peer = &request.base_headers.from.uri;

        if !self.accepting {
            log::info!("Rejecting call from {peer}, shutting down");
            self.reply(ctx, &request, StatusCode::SERVICE_UNAVAILABLE, None)
                .await;
            return None;
        }

        if slot.as_ref().is_some_and(|call| !call.is_terminated()) {
            log::info!("Rejecting call from {peer}, busy");
            self.reply(ctx, &request, StatusCode::BUSY_HERE, None).await;
            return None;
        }

        log::info!("Accepting incoming call from {peer}");

        ctx.media.reset_remote();

        match CallSession::accept(ctx, &request).await {
            Ok((call, event)) => {
                *slot = Some(call);
                Some(event)
            }
            Err(e) => {
                log::warn!("Failed to accept call from {peer}, {e}");
                self.reply(
                    ctx,
                    &request,
                    StatusCode::SERVER_INTERNAL_ERROR,
                    Some(e.to_string().into()),
                )
                .await;
                None
            }
        }
    }

    async fn reply(
        &self,
        ctx: &mut CallContext<'_>,
        request: &IncomingRequest,
        code: StatusCode,
        reason: Option<bytesstr::BytesStr>,
    ) {
        let response = ctx.endpoint.create_response(request, code, reason);

        if let Err(e) = ctx.endpoint.respond(request, response).await {
            log::warn!("Failed to respond to {}, {e}", request.line);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::{endpoint, received_message, status_code};
    use session::{Format, MediaDescription};
    use sip_auth::{DigestAuthenticator, DigestCredentials};
    use sip_core::EndpointEvent;
    use sip_core::Endpoint;

    type Call = CallSession<DigestAuthenticator<DigestCredentials>>;

    fn invite(branch: &str, call_id: &str) -> String {
        format!(
            "INVITE sip:demo@127.0.0.1:5060 SIP/2.0\r\n\
            Via: SIP/2.0/UDP 127.0.0.1:5070;branch=z9hG4bK{branch}\r\n\
            From: <sip:peer@127.0.0.1>;tag=peer\r\n\
            To: <sip:demo@127.0.0.1>\r\n\
            Call-ID: {call_id}\r\n\
            CSeq: 1 INVITE\r\n\
            Content-Length: 0\r\n\
            \r\n"
        )
    }

    async fn request(endpoint: &mut Endpoint, raw: String) -> IncomingRequest {
        let message = received_message(endpoint, raw);

        match endpoint.receive(message).await {
            Some(EndpointEvent::Request(request)) => request,
            other => panic!("expected request event, got {other:?}"),
        }
    }

    fn media() -> MediaDescription {
        MediaDescription::new("127.0.0.1".parse().unwrap(), 40000, vec![Format::PCMU])
    }

    #[tokio::test]
    async fn second_call_is_busy() {
        let (mut endpoint, mock) = endpoint();
        let mut media = media();
        let mut ctx = CallContext {
            endpoint: &mut endpoint,
            media: &mut media,
        };

        let listener = SessionListener::new();
        let mut slot: Option<Call> = None;

        let first = request(ctx.endpoint, invite("first", "call-1")).await;
        let event = listener.on_incoming_request(&mut ctx, first, &mut slot).await;
        assert_eq!(event, Some(CallEvent::Established));
        assert!(slot.is_some());
        assert_eq!(status_code(&mock.take_sent()[0]), 200);

        let second = request(ctx.endpoint, invite("second", "call-2")).await;
        let event = listener.on_incoming_request(&mut ctx, second, &mut slot).await;
        assert!(event.is_none());

        let sent = mock.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(status_code(&sent[0]), 486);

        // the existing call is untouched
        assert_eq!(&*slot.as_ref().unwrap().call_id().0, "call-1");
    }

    #[tokio::test]
    async fn rejects_while_shutting_down() {
        let (mut endpoint, mock) = endpoint();
        let mut media = media();
        let mut ctx = CallContext {
            endpoint: &mut endpoint,
            media: &mut media,
        };

        let mut listener = SessionListener::new();
        listener.set_accepting(false);

        let mut slot: Option<Call> = None;

        let invite = request(ctx.endpoint, invite("late", "call-3")).await;
        assert!(
            listener
                .on_incoming_request(&mut ctx, invite, &mut slot)
                .await
                .is_none()
        );
        assert!(slot.is_none());
        assert_eq!(status_code(&mock.take_sent()[0]), 503);
    }

    #[tokio::test]
    async fn unknown_dialog_request() {
        let (mut endpoint, mock) = endpoint();
        let mut media = media();
        let mut ctx = CallContext {
            endpoint: &mut endpoint,
            media: &mut media,
        };

        let listener = SessionListener::new();
        let mut slot: Option<Call> = None;

        let bye = request(
            ctx.endpoint,
            "BYE sip:demo@127.0.0.1:5060 SIP/2.0\r\n\
            Via: SIP/2.0/UDP 127.0.0.1:5070;branch=z9hG4bKstray\r\n\
            From: <sip:peer@127.0.0.1>;tag=peer\r\n\
            To: <sip:demo@127.0.0.1>;tag=gone\r\n\
            Call-ID: gone\r\n\
            CSeq: 5 BYE\r\n\
            Content-Length: 0\r\n\
            \r\n"
                .to_string(),
        )
        .await;

        assert!(
            listener
                .on_incoming_request(&mut ctx, bye, &mut slot)
                .await
                .is_none()
        );
        assert_eq!(status_code(&mock.take_sent()[0]), 481);
    }

    #[tokio::test]
    async fn malformed_offer_is_rejected() {
        let (mut endpoint, mock) = endpoint();
        let mut media = media();
        let mut ctx = CallContext {
            endpoint: &mut endpoint,
            media: &mut media,
        };

        let listener = SessionListener::new();
        let mut slot: Option<Call> = None;

        let body = "this is not a session description";
        let invite = request(
            ctx.endpoint,
            format!(
                "INVITE sip:demo@127.0.0.1:5060 SIP/2.0\r\n\
                Via: SIP/2.0/UDP 127.0.0.1:5070;branch=z9hG4bKbroken\r\n\
                From: <sip:peer@127.0.0.1>;tag=peer\r\n\
                To: <sip:demo@127.0.0.1>\r\n\
                Call-ID: call-4\r\n\
                CSeq: 1 INVITE\r\n\
                Content-Type: application/sdp\r\n\
                Content-Length: {}\r\n\
                \r\n\
                {body}",
                body.len()
            ),
        )
        .await;

        let event = listener.on_incoming_request(&mut ctx, invite, &mut slot).await;
        assert!(event.is_none());
        assert!(slot.is_none());

        let sent = mock.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(status_code(&sent[0]), 500);
    }
}
