use crate::CallContext;
use crate::dialog::Dialog;
use crate::util::{
    contact_for, insert_allow, random_sequence_number, random_string, sdp_body, set_sdp_body,
};
use bytesstr::BytesStr;
use session::{DecodeError, EncodeError};
use sip_auth::{ClientAuthenticator, RequestParts, ResponseParts};
use sip_core::transaction::TsxKey;
use sip_core::transport::TargetTransportInfo;
use sip_core::{Endpoint, IncomingRequest, Request, Response, TsxResponse};
use sip_types::header::typed::{CSeq, CallId, Contact, FromTo};
use sip_types::uri::{NameAddr, SipUri};
use sip_types::{CodeKind, Method, Name, StatusCode};
use std::fmt;

/// Errors when starting an outbound call, no session exists afterwards
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("failed to create SDP offer, {0}")]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Core(#[from] sip_core::Error),
}

/// Errors when accepting an inbound call, the INVITE must be answered with a server error
#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    #[error("unsupported content type {0}")]
    UnsupportedContent(BytesStr),
    #[error("failed to decode SDP offer, {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to create SDP, {0}")]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Core(#[from] sip_core::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// INVITE sent, nothing but 100 received
    Calling,
    /// Provisional response received
    Early,
    /// Inbound INVITE being answered
    Offering,
    Confirmed,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The INVITE got a final non-2xx response
    Rejected {
        code: StatusCode,
        reason: Option<BytesStr>,
    },
    /// Peer sent BYE
    RemoteHangup,
    /// [`CallSession::terminate`] was called
    LocalHangup,
    /// Signaling or negotiation failed locally
    Error(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Rejected { code, reason } => {
                write!(f, "{code}")?;

                if let Some(reason) = reason.as_deref().or(code.text()) {
                    write!(f, " {reason}")?;
                }

                Ok(())
            }
            CloseReason::RemoteHangup => f.write_str("terminated by peer"),
            CloseReason::LocalHangup => f.write_str("terminated locally"),
            CloseReason::Error(e) => write!(f, "local error, {e}"),
        }
    }
}

/// Lifecycle notification returned by the handlers of a [`CallSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// Provisional response to our INVITE (e.g. ringing)
    Progress {
        code: StatusCode,
        reason: Option<BytesStr>,
    },
    /// The call is confirmed, fired once per call whether or not media could be negotiated
    Established,
    /// A later offer/answer exchange completed (answer in ACK or re-INVITE)
    Negotiated,
    Closed(CloseReason),
}

/// Configuration of an outbound call
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Local identity used in From
    pub id: NameAddr,
    pub target: SipUri,
    /// How many challenges are answered for the INVITE
    pub max_auth_retries: u32,
}

/// INVITE sent by us, kept for challenge retries and CANCEL
#[derive(Debug)]
struct OutgoingInvite {
    key: TsxKey,
    request: Request,
    cseq: u32,
}

/// A single INVITE session, either placed by us or accepted from a peer.
///
/// All handlers are sans-IO, they are given the [`CallContext`] to send through the
/// endpoint and to negotiate with the shared media description.
#[derive(Debug)]
pub struct CallSession<A> {
    role: CallRole,
    state: CallState,

    local_id: NameAddr,
    peer_id: NameAddr,
    local_tag: BytesStr,
    call_id: CallId,
    local_contact: Contact,
    target: TargetTransportInfo,

    /// Next step must carry an answer from the peer (we sent the offer in a 2xx)
    pending_offer: bool,

    authenticator: Option<A>,
    max_auth_retries: u32,
    auth_attempts: u32,

    invite: Option<OutgoingInvite>,
    /// Server transaction of the last INVITE we accepted
    accepted: Option<TsxKey>,
    dialog: Option<Dialog>,
    ack: Option<Request>,

    cancel: Option<TsxKey>,
    bye: Option<TsxKey>,

    close_reason: Option<CloseReason>,
}

impl<A> CallSession<A>
where
    A: ClientAuthenticator,
{
    /// Place a call by sending an INVITE carrying an SDP offer.
    ///
    /// Nothing is left behind when this fails.
    #[tracing::instrument(level = "debug", skip_all, fields(target = %config.target))]
    pub async fn connect(
        ctx: &mut CallContext<'_>,
        config: CallConfig,
        authenticator: A,
    ) -> Result<Self, CallError> {
        let offer = ctx.media.encode(true)?;

        let (transport, destination) = ctx.endpoint.select_transport(&config.target).await?;
        let local_contact = contact_for(config.id.uri.user.clone(), transport.sent_by());

        let mut session = Self {
            role: CallRole::Caller,
            state: CallState::Calling,
            local_id: config.id.clone(),
            peer_id: NameAddr::uri(config.target.clone()),
            local_tag: random_string(),
            call_id: CallId::new(random_string()),
            local_contact,
            target: TargetTransportInfo {
                via_host_port: None,
                transport: Some((transport, destination)),
            },
            pending_offer: false,
            authenticator: Some(authenticator),
            max_auth_retries: config.max_auth_retries,
            auth_attempts: 0,
            invite: None,
            accepted: None,
            dialog: None,
            ack: None,
            cancel: None,
            bye: None,
            close_reason: None,
        };

        let mut request = Request::new(Method::INVITE, config.target);
        request.headers.insert_type(
            Name::FROM,
            &FromTo::new(session.local_id.clone(), Some(session.local_tag.clone())),
        );
        request
            .headers
            .insert_type(Name::TO, &FromTo::new(session.peer_id.clone(), None));
        request.headers.insert_named(&session.call_id);
        request
            .headers
            .insert_named(&CSeq::new(random_sequence_number(), Method::INVITE));
        request.headers.insert_named(&session.local_contact);
        insert_allow(ctx.endpoint, &mut request.headers);
        set_sdp_body(&mut request.headers, &mut request.body, offer);

        session.send_invite(ctx.endpoint, request).await?;

        log::debug!("Sent INVITE to {}", session.peer_id);

        Ok(session)
    }

    /// Accept an inbound INVITE with a 2xx response.
    ///
    /// An offer in the INVITE is answered, otherwise the 2xx carries our offer and the
    /// answer is expected in the ACK. On error no session exists and the INVITE must still
    /// be answered.
    pub async fn accept(
        ctx: &mut CallContext<'_>,
        request: &IncomingRequest,
    ) -> Result<(Self, CallEvent), AcceptError> {
        let offer = sdp_body(&request.headers, &request.body)
            .map_err(AcceptError::UnsupportedContent)?;

        let got_offer = offer.is_some();

        if let Some(offer) = offer {
            ctx.media.decode(offer, true)?;
        }

        let sdp = ctx.media.encode(!got_offer)?;

        let local_tag = random_string();
        let local_contact = contact_for(
            request.line.uri.user.clone(),
            request.transport.sent_by(),
        );
        let dialog = Dialog::new_server(request, local_tag.clone(), local_contact.clone());

        let mut session = Self {
            role: CallRole::Callee,
            state: CallState::Offering,
            local_id: dialog.local.uri.clone(),
            peer_id: dialog.peer.uri.clone(),
            local_tag,
            call_id: dialog.call_id.clone(),
            local_contact,
            target: dialog.target_tp_info.clone(),
            pending_offer: !got_offer,
            authenticator: None,
            max_auth_retries: 0,
            auth_attempts: 0,
            invite: None,
            accepted: Some(request.tsx_key.clone()),
            dialog: None,
            ack: None,
            cancel: None,
            bye: None,
            close_reason: None,
        };

        let mut response = dialog.create_response(ctx.endpoint, request, StatusCode::OK, None);
        set_sdp_body(&mut response.headers, &mut response.body, sdp);

        ctx.endpoint.respond(request, response).await?;

        session.dialog = Some(dialog);
        session.state = CallState::Confirmed;

        Ok((session, CallEvent::Established))
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Identity of the peer, the target of an outbound call or From of an inbound one
    pub fn peer(&self) -> &NameAddr {
        &self.peer_id
    }

    pub fn local(&self) -> &NameAddr {
        &self.local_id
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Set while an offer sent in a 2xx waits for the answer in the ACK
    pub fn pending_offer(&self) -> bool {
        self.pending_offer
    }

    pub fn is_terminated(&self) -> bool {
        self.state == CallState::Terminated
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// Returns if the request belongs to this call
    pub fn matches(&self, request: &IncomingRequest) -> bool {
        let base_headers = &request.base_headers;

        if base_headers.call_id != self.call_id {
            return false;
        }

        // CANCEL carries the To of the INVITE, which has no tag
        if request.line.method == Method::CANCEL {
            return self.role == CallRole::Callee;
        }

        base_headers.to.tag.as_ref() == Some(&self.local_tag)
    }

    /// Returns if the client or server transaction belongs to this call
    pub fn owns(&self, key: &TsxKey) -> bool {
        self.invite.as_ref().is_some_and(|invite| invite.key == *key)
            || self.accepted.as_ref() == Some(key)
            || self.cancel.as_ref() == Some(key)
            || self.bye.as_ref() == Some(key)
    }

    /// Pass a response to one of the call's client transactions
    pub async fn handle_response(
        &mut self,
        ctx: &mut CallContext<'_>,
        key: &TsxKey,
        response: TsxResponse,
    ) -> Option<CallEvent> {
        if self.cancel.as_ref() == Some(key) || self.bye.as_ref() == Some(key) {
            log::debug!("Got {} for {}", response.line, key.method());
            return None;
        }

        if !self.invite.as_ref().is_some_and(|invite| invite.key == *key) {
            return None;
        }

        match response.line.code.kind() {
            CodeKind::Provisional => self.receive_provisional(response),
            CodeKind::Success => self.receive_success(ctx, response).await,
            _ => self.receive_failure(ctx.endpoint, response).await,
        }
    }

    /// Pass a request that [matches](Self::matches) this call
    pub async fn handle_request(
        &mut self,
        ctx: &mut CallContext<'_>,
        request: IncomingRequest,
    ) -> Option<CallEvent> {
        let method = request.line.method.clone();

        if method == Method::ACK {
            return self.receive_ack(ctx, request).await;
        }

        if method == Method::CANCEL {
            // the INVITE was answered right away, there is nothing left to cancel
            self.respond(ctx.endpoint, &request, StatusCode::OK).await;
            return None;
        }

        let in_order = self
            .dialog
            .as_mut()
            .is_none_or(|dialog| dialog.receive_peer_cseq(&request));

        if !in_order {
            log::warn!("Rejecting {} with out of order CSeq", request.line);
            self.respond(ctx.endpoint, &request, StatusCode::SERVER_INTERNAL_ERROR)
                .await;
            return None;
        }

        if method == Method::BYE {
            self.respond(ctx.endpoint, &request, StatusCode::OK).await;

            if self.state == CallState::Terminated {
                return None;
            }

            return Some(self.close(CloseReason::RemoteHangup));
        }

        if method == Method::INVITE {
            return self.receive_reinvite(ctx, request).await;
        }

        if method == Method::OPTIONS {
            let mut response = ctx
                .endpoint
                .create_response(&request, StatusCode::OK, None);
            insert_allow(ctx.endpoint, &mut response.headers);
            self.send_response(ctx.endpoint, &request, response).await;
            return None;
        }

        self.respond(ctx.endpoint, &request, StatusCode::NOT_IMPLEMENTED)
            .await;

        None
    }

    /// A transaction of this call timed out, either the INVITE got no final response
    /// or the 2xx we sent was never acknowledged
    pub async fn handle_timeout(
        &mut self,
        ctx: &mut CallContext<'_>,
        key: &TsxKey,
    ) -> Option<CallEvent> {
        if self.invite.as_ref().is_some_and(|invite| invite.key == *key) {
            self.invite = None;

            if matches!(self.state, CallState::Calling | CallState::Early) {
                return Some(self.close(CloseReason::Error("INVITE timed out".into())));
            }

            return None;
        }

        if self.accepted.as_ref() == Some(key) {
            self.accepted = None;

            if self.state == CallState::Terminated {
                return None;
            }

            log::warn!("No ACK received from {}", self.peer_id);

            self.send_bye(ctx.endpoint).await;
            return Some(self.close(CloseReason::Error("no ACK received".into())));
        }

        if self.bye.as_ref() == Some(key) || self.cancel.as_ref() == Some(key) {
            log::debug!("{} to {} timed out", key.method(), self.peer_id);
        }

        None
    }

    /// Hang up: CANCEL while the INVITE is pending, BYE once confirmed.
    ///
    /// Returns immediately, retransmissions are left to the endpoint.
    pub async fn terminate(&mut self, ctx: &mut CallContext<'_>) -> Option<CallEvent> {
        match self.state {
            CallState::Terminated => return None,
            CallState::Calling | CallState::Early => self.send_cancel(ctx.endpoint).await,
            CallState::Offering | CallState::Confirmed => self.send_bye(ctx.endpoint).await,
        }

        Some(self.close(CloseReason::LocalHangup))
    }

    fn receive_provisional(&mut self, response: TsxResponse) -> Option<CallEvent> {
        if !matches!(self.state, CallState::Calling | CallState::Early) {
            return None;
        }

        let code = response.line.code;

        if code == StatusCode::TRYING {
            return None;
        }

        self.state = CallState::Early;

        Some(CallEvent::Progress {
            code,
            reason: response.line.reason,
        })
    }

    async fn receive_success(
        &mut self,
        ctx: &mut CallContext<'_>,
        response: TsxResponse,
    ) -> Option<CallEvent> {
        match self.state {
            CallState::Calling | CallState::Early => {}
            CallState::Confirmed => {
                // retransmitted 2xx, our ACK got lost
                self.resend_ack(ctx.endpoint).await;
                return None;
            }
            CallState::Terminated => {
                log::info!("{} answered after the call was terminated", self.peer_id);

                if self.dialog.is_none() {
                    self.create_client_dialog(ctx.endpoint, &response).await;
                    self.send_bye(ctx.endpoint).await;
                } else {
                    self.resend_ack(ctx.endpoint).await;
                }

                return None;
            }
            CallState::Offering => return None,
        }

        self.create_client_dialog(ctx.endpoint, &response).await;

        let negotiated = match sdp_body(&response.headers, &response.body) {
            Ok(Some(answer)) => ctx
                .media
                .decode(answer, false)
                .map_err(|e| format!("failed to decode SDP answer, {e}")),
            Ok(None) => Err("2xx response without SDP answer".to_string()),
            Err(content_type) => Err(format!("unsupported content type {content_type}")),
        };

        if let Err(reason) = negotiated {
            log::warn!("Closing call to {}, {reason}", self.peer_id);

            self.send_bye(ctx.endpoint).await;
            return Some(self.close(CloseReason::Error(reason)));
        }

        self.state = CallState::Confirmed;

        Some(CallEvent::Established)
    }

    async fn receive_failure(
        &mut self,
        endpoint: &mut Endpoint,
        response: TsxResponse,
    ) -> Option<CallEvent> {
        let code = response.line.code;

        if self.state == CallState::Terminated {
            // most likely the 487 to our CANCEL
            log::debug!("Got {} after call was terminated", response.line);
            return None;
        }

        let challenged = matches!(
            code,
            StatusCode::UNAUTHORIZED | StatusCode::PROXY_AUTHENTICATION_REQUIRED
        );

        if challenged && self.auth_attempts < self.max_auth_retries {
            match self.retry_with_credentials(endpoint, &response).await {
                Ok(()) => return None,
                Err(reason) => {
                    log::warn!("Failed to answer challenge of {}, {reason}", self.peer_id);
                }
            }
        }

        self.invite = None;

        Some(self.close(CloseReason::Rejected {
            code,
            reason: response.line.reason,
        }))
    }

    async fn retry_with_credentials(
        &mut self,
        endpoint: &mut Endpoint,
        response: &TsxResponse,
    ) -> Result<(), String> {
        let (Some(authenticator), Some(invite)) = (&mut self.authenticator, &self.invite) else {
            return Err("no authenticator".into());
        };

        authenticator
            .handle_rejection(
                RequestParts {
                    line: &invite.request.line,
                    headers: &invite.request.headers,
                    body: &invite.request.body,
                },
                ResponseParts {
                    line: &response.line,
                    headers: &response.headers,
                    body: &response.body,
                },
            )
            .map_err(|e| e.to_string())?;

        let mut request = invite.request.clone();
        request
            .headers
            .replace_named(&CSeq::new(invite.cseq + 1, Method::INVITE));

        self.auth_attempts += 1;

        self.send_invite(endpoint, request)
            .await
            .map_err(|e| e.to_string())
    }

    async fn send_invite(
        &mut self,
        endpoint: &mut Endpoint,
        mut request: Request,
    ) -> Result<(), sip_core::Error> {
        if let Some(authenticator) = &mut self.authenticator {
            authenticator.authorize_request(&request.line, &mut request.headers);
        }

        let cseq = request.headers.get_named::<CSeq>()?.cseq;

        let key = endpoint
            .send_request(request.clone(), &mut self.target)
            .await?;

        self.invite = Some(OutgoingInvite { key, request, cseq });

        Ok(())
    }

    async fn create_client_dialog(&mut self, endpoint: &mut Endpoint, response: &TsxResponse) {
        let Some(invite) = &self.invite else {
            return;
        };

        let dialog = Dialog::new_client(
            self.local_id.clone(),
            self.local_tag.clone(),
            self.call_id.clone(),
            invite.cseq + 1,
            self.local_contact.clone(),
            response,
            self.target.clone(),
        );

        self.ack = Some(dialog.create_ack(invite.cseq));
        self.dialog = Some(dialog);

        self.resend_ack(endpoint).await;
    }

    async fn resend_ack(&mut self, endpoint: &mut Endpoint) {
        let (Some(ack), Some(dialog)) = (&self.ack, &mut self.dialog) else {
            return;
        };

        if let Err(e) = endpoint
            .send_ack(ack.clone(), &mut dialog.target_tp_info)
            .await
        {
            log::warn!("Failed to send ACK to {}, {e}", self.peer_id);
        }
    }

    async fn receive_ack(
        &mut self,
        ctx: &mut CallContext<'_>,
        request: IncomingRequest,
    ) -> Option<CallEvent> {
        self.accepted = None;

        if !self.pending_offer || self.state != CallState::Confirmed {
            return None;
        }

        self.pending_offer = false;

        let negotiated = match sdp_body(&request.headers, &request.body) {
            Ok(Some(answer)) => ctx
                .media
                .decode(answer, false)
                .map_err(|e| format!("failed to decode SDP answer in ACK, {e}")),
            Ok(None) => Err("ACK without SDP answer".to_string()),
            Err(content_type) => Err(format!("unsupported content type {content_type} in ACK")),
        };

        match negotiated {
            Ok(()) => Some(CallEvent::Negotiated),
            Err(reason) => {
                log::warn!("Closing call with {}, {reason}", self.peer_id);

                self.send_bye(ctx.endpoint).await;
                Some(self.close(CloseReason::Error(reason)))
            }
        }
    }

    async fn receive_reinvite(
        &mut self,
        ctx: &mut CallContext<'_>,
        request: IncomingRequest,
    ) -> Option<CallEvent> {
        if self.state != CallState::Confirmed || self.pending_offer {
            self.respond(ctx.endpoint, &request, StatusCode::SERVER_INTERNAL_ERROR)
                .await;
            return None;
        }

        let offer = match sdp_body(&request.headers, &request.body) {
            Ok(offer) => offer,
            Err(content_type) => {
                log::warn!("Rejecting re-INVITE with content type {content_type}");
                self.respond(ctx.endpoint, &request, StatusCode::UNSUPPORTED_MEDIA_TYPE)
                    .await;
                return None;
            }
        };

        let got_offer = offer.is_some();

        if let Some(offer) = offer {
            if let Err(e) = ctx.media.decode(offer, true) {
                log::warn!("Rejecting re-INVITE, {e}");
                self.respond(ctx.endpoint, &request, StatusCode::NOT_ACCEPTABLE_HERE)
                    .await;
                return None;
            }
        }

        let sdp = match ctx.media.encode(!got_offer) {
            Ok(sdp) => sdp,
            Err(e) => {
                log::warn!("Failed to create SDP for re-INVITE, {e}");
                self.respond(ctx.endpoint, &request, StatusCode::SERVER_INTERNAL_ERROR)
                    .await;
                return None;
            }
        };

        let Some(dialog) = &mut self.dialog else {
            return None;
        };

        if let Ok(contact) = request.headers.get_named::<Contact>() {
            dialog.peer_target = contact.uri.uri;
        }

        let mut response = dialog.create_response(ctx.endpoint, &request, StatusCode::OK, None);
        set_sdp_body(&mut response.headers, &mut response.body, sdp);

        self.send_response(ctx.endpoint, &request, response).await;

        self.accepted = Some(request.tsx_key.clone());
        self.pending_offer = !got_offer;

        got_offer.then_some(CallEvent::Negotiated)
    }

    async fn send_cancel(&mut self, endpoint: &mut Endpoint) {
        let Some(invite) = &self.invite else {
            return;
        };

        match endpoint.send_cancel(&invite.key).await {
            Ok(key) => self.cancel = Some(key),
            Err(e) => {
                log::warn!("Failed to send CANCEL to {}, {e}", self.peer_id);
                endpoint.abandon(&invite.key);
            }
        }
    }

    async fn send_bye(&mut self, endpoint: &mut Endpoint) {
        let Some(dialog) = &mut self.dialog else {
            return;
        };

        let mut request = dialog.create_request(Method::BYE);

        if let Some(authenticator) = &mut self.authenticator {
            authenticator.authorize_request(&request.line, &mut request.headers);
        }

        match endpoint
            .send_request(request, &mut dialog.target_tp_info)
            .await
        {
            Ok(key) => self.bye = Some(key),
            Err(e) => log::warn!("Failed to send BYE to {}, {e}", self.peer_id),
        }
    }

    async fn respond(&self, endpoint: &mut Endpoint, request: &IncomingRequest, code: StatusCode) {
        let response = match &self.dialog {
            Some(dialog) => dialog.create_response(endpoint, request, code, None),
            None => endpoint.create_response(request, code, None),
        };

        self.send_response(endpoint, request, response).await;
    }

    async fn send_response(
        &self,
        endpoint: &mut Endpoint,
        request: &IncomingRequest,
        response: Response,
    ) {
        if let Err(e) = endpoint.respond(request, response).await {
            log::warn!("Failed to respond to {} from {}, {e}", request.line.method, self.peer_id);
        }
    }

    fn close(&mut self, reason: CloseReason) -> CallEvent {
        self.state = CallState::Terminated;
        self.pending_offer = false;
        self.close_reason = Some(reason.clone());

        CallEvent::Closed(reason)
    }
}
