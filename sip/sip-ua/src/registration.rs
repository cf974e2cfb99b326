use crate::util::{contact_for, random_sequence_number, random_string};
use bytesstr::BytesStr;
use sip_auth::{ClientAuthenticator, RequestParts, ResponseParts};
use sip_core::transaction::TsxKey;
use sip_core::transport::TargetTransportInfo;
use sip_core::{Endpoint, Request, TsxResponse};
use sip_types::header::typed::{CSeq, CallId, Contact, Expires, FromTo};
use sip_types::uri::{NameAddr, SipUri};
use sip_types::{CodeKind, Method, Name, StatusCode};
use std::fmt;
use std::time::{Duration, Instant};

/// Any errors that might be encountered when sending a REGISTER request
#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error(transparent)]
    Core(#[from] sip_core::Error),
}

/// Configuration used to bind an identity to a SIP registrar
#[derive(Debug, Clone)]
pub struct RegistrarConfig {
    pub registrar: SipUri,

    /// Address of record, used in From and To
    pub id: NameAddr,

    /// Requested lifetime of the binding, also the refresh interval
    pub expiry: Duration,

    /// Refresh the binding this long before it expires
    pub refresh_margin: Duration,

    /// How many challenges are answered for a single REGISTER
    pub max_auth_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Idle,
    Registering,
    Registered,
    Refreshing,
    Failed,
    Deregistered,
}

/// Why a registration ended up in [`RegistrationState::Failed`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationFailure {
    /// Registrar answered with a final non-2xx response
    Rejected {
        code: StatusCode,
        reason: Option<BytesStr>,
    },
    /// Challenge could not be answered
    Authentication { code: StatusCode, error: String },
    /// No final response arrived in time
    TimedOut,
    /// The request could not be sent
    Transport(String),
}

impl fmt::Display for RegistrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationFailure::Rejected { code, reason } => {
                write!(f, "{code}")?;

                if let Some(reason) = reason.as_deref().or(code.text()) {
                    write!(f, " {reason}")?;
                }

                Ok(())
            }
            RegistrationFailure::Authentication { code, error } => {
                write!(f, "{code} authentication failed, {error}")
            }
            RegistrationFailure::TimedOut => f.write_str("request timed out"),
            RegistrationFailure::Transport(e) => write!(f, "transport error, {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationEvent {
    /// The binding was created or refreshed, `expires` is what the registrar granted
    Registered { expires: Option<u32> },
    Failed(RegistrationFailure),
}

#[derive(Debug)]
struct PendingRegister {
    key: TsxKey,
    request: Request,
}

/// REGISTER lifecycle against a single registrar.
///
/// Sans-IO: responses and timeouts of the transaction are passed in by the owner, which
/// also calls [`RegistrationClient::poll`] once [`RegistrationClient::timeout`] is reached
/// to refresh the binding.
#[derive(Debug)]
pub struct RegistrationClient<A> {
    config: RegistrarConfig,
    authenticator: A,

    state: RegistrationState,

    local: FromTo,
    call_id: CallId,
    cseq: u32,
    contact: Option<Contact>,
    target: TargetTransportInfo,

    pending: Option<PendingRegister>,
    auth_attempts: u32,
    refresh_at: Option<Instant>,

    last_response: Option<(StatusCode, Option<BytesStr>)>,
    failure: Option<RegistrationFailure>,
}

impl<A: ClientAuthenticator> RegistrationClient<A> {
    pub fn new(config: RegistrarConfig, authenticator: A) -> Self {
        let local = FromTo::new(config.id.clone(), Some(random_string()));

        Self {
            config,
            authenticator,
            state: RegistrationState::Idle,
            local,
            call_id: CallId::new(random_string()),
            cseq: random_sequence_number(),
            contact: None,
            target: TargetTransportInfo::default(),
            pending: None,
            auth_attempts: 0,
            refresh_at: None,
            last_response: None,
            failure: None,
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    pub fn config(&self) -> &RegistrarConfig {
        &self.config
    }

    /// Status and reason of the last final response
    pub fn last_response(&self) -> Option<(StatusCode, Option<&BytesStr>)> {
        self.last_response
            .as_ref()
            .map(|(code, reason)| (*code, reason.as_ref()))
    }

    pub fn failure(&self) -> Option<&RegistrationFailure> {
        self.failure.as_ref()
    }

    /// Returns if the transaction belongs to this registration
    pub fn owns(&self, key: &TsxKey) -> bool {
        self.pending.as_ref().is_some_and(|pending| pending.key == *key)
    }

    /// When the binding must be refreshed
    pub fn timeout(&self) -> Option<Instant> {
        self.refresh_at
    }

    /// Send a REGISTER request, a pending one is abandoned.
    ///
    /// A failure to send moves the registration to [`RegistrationState::Failed`].
    pub async fn register(&mut self, endpoint: &mut Endpoint) -> Result<(), RegisterError> {
        if let Some(pending) = self.pending.take() {
            endpoint.abandon(&pending.key);
        }

        self.refresh_at = None;
        self.auth_attempts = 0;
        self.state = if self.state == RegistrationState::Registered {
            RegistrationState::Refreshing
        } else {
            RegistrationState::Registering
        };

        if let Err(e) = self.send_register(endpoint).await {
            self.fail(RegistrationFailure::Transport(e.to_string()));
            return Err(e.into());
        }

        Ok(())
    }

    /// Refresh the binding if it is due at `now`
    pub async fn poll(
        &mut self,
        endpoint: &mut Endpoint,
        now: Instant,
    ) -> Option<RegistrationEvent> {
        if !self.refresh_at.is_some_and(|at| at <= now) {
            return None;
        }

        log::debug!("Refreshing registration at {}", self.config.registrar);

        match self.register(endpoint).await {
            Ok(()) => None,
            Err(_) => self.failure.clone().map(RegistrationEvent::Failed),
        }
    }

    /// Pass a response to a transaction of this registration
    pub async fn handle_response(
        &mut self,
        endpoint: &mut Endpoint,
        key: &TsxKey,
        response: TsxResponse,
    ) -> Option<RegistrationEvent> {
        if !self.owns(key) {
            return None;
        }

        let code = response.line.code;

        match code.kind() {
            CodeKind::Provisional => None,
            CodeKind::Success => {
                self.pending = None;
                self.last_response = Some((code, response.line.reason.clone()));

                Some(self.registered(&response))
            }
            _ if matches!(
                code,
                StatusCode::UNAUTHORIZED | StatusCode::PROXY_AUTHENTICATION_REQUIRED
            ) && self.auth_attempts < self.config.max_auth_retries =>
            {
                self.last_response = Some((code, response.line.reason.clone()));
                self.retry_with_credentials(endpoint, response).await
            }
            _ => {
                self.pending = None;
                self.last_response = Some((code, response.line.reason.clone()));

                Some(self.fail(RegistrationFailure::Rejected {
                    code,
                    reason: response.line.reason,
                }))
            }
        }
    }

    /// The transaction of `key` never got a final response
    pub fn handle_timeout(&mut self, key: &TsxKey) -> Option<RegistrationEvent> {
        if !self.owns(key) {
            return None;
        }

        self.pending = None;

        Some(self.fail(RegistrationFailure::TimedOut))
    }

    /// Cancel the refresh and abandon any pending transaction.
    ///
    /// No REGISTER removing the binding is sent.
    pub fn stop(&mut self, endpoint: &mut Endpoint) {
        self.refresh_at = None;

        if let Some(pending) = self.pending.take() {
            endpoint.abandon(&pending.key);
        }

        if self.state != RegistrationState::Failed {
            self.state = RegistrationState::Deregistered;
        }
    }

    fn registered(&mut self, response: &TsxResponse) -> RegistrationEvent {
        let expires = self.granted_expiry(response);
        let requested = self.config.expiry.as_secs();

        if let Some(expires) = expires.filter(|&expires| u64::from(expires) < requested) {
            log::info!("Registrar granted {expires}s instead of the requested {requested}s");
        }

        self.state = RegistrationState::Registered;
        self.failure = None;

        // refresh with the requested interval, not the granted one
        let interval = self.config.expiry.saturating_sub(self.config.refresh_margin);
        self.refresh_at = Some(Instant::now() + interval);

        RegistrationEvent::Registered { expires }
    }

    /// Expiry of our binding in a 2xx response, falls back to the Expires header
    fn granted_expiry(&self, response: &TsxResponse) -> Option<u32> {
        let contacts: Vec<Contact> = response.headers.get_all_named().unwrap_or_default();

        let ours = self.contact.as_ref().and_then(|own| {
            contacts
                .iter()
                .find(|contact| contact.uri.uri.compare(&own.uri.uri))
        });

        ours.and_then(Contact::expires)
            .or_else(|| response.headers.get_named::<Expires>().ok().map(|e| e.0))
    }

    async fn retry_with_credentials(
        &mut self,
        endpoint: &mut Endpoint,
        response: TsxResponse,
    ) -> Option<RegistrationEvent> {
        let pending = self.pending.take()?;
        let code = response.line.code;

        let result = self.authenticator.handle_rejection(
            RequestParts {
                line: &pending.request.line,
                headers: &pending.request.headers,
                body: &pending.request.body,
            },
            ResponseParts {
                line: &response.line,
                headers: &response.headers,
                body: &response.body,
            },
        );

        if let Err(e) = result {
            log::warn!("Failed to answer challenge of {}, {e}", self.config.registrar);

            return Some(self.fail(RegistrationFailure::Authentication {
                code,
                error: e.to_string(),
            }));
        }

        self.auth_attempts += 1;

        match self.send_register(endpoint).await {
            Ok(()) => None,
            Err(e) => Some(self.fail(RegistrationFailure::Transport(e.to_string()))),
        }
    }

    async fn send_register(&mut self, endpoint: &mut Endpoint) -> Result<(), sip_core::Error> {
        if self.target.transport.is_none() {
            let (transport, destination) = endpoint.select_transport(&self.config.registrar).await?;

            self.contact = Some(contact_for(
                self.config.id.uri.user.clone(),
                transport.sent_by(),
            ));
            self.target.transport = Some((transport, destination));
        }

        let mut request = self.create_register();
        self.authenticator
            .authorize_request(&request.line, &mut request.headers);

        let key = endpoint
            .send_request(request.clone(), &mut self.target)
            .await?;

        log::debug!("Sent REGISTER to {}", self.config.registrar);

        self.pending = Some(PendingRegister { key, request });

        Ok(())
    }

    fn create_register(&mut self) -> Request {
        let mut request = Request::new(Method::REGISTER, self.config.registrar.clone());

        let expires = u32::try_from(self.config.expiry.as_secs()).unwrap_or(u32::MAX);

        request.headers.insert_type(Name::FROM, &self.local);
        request
            .headers
            .insert_type(Name::TO, &FromTo::new(self.config.id.clone(), None));
        request.headers.insert_named(&self.call_id);
        request
            .headers
            .insert_named(&CSeq::new(self.cseq, Method::REGISTER));
        self.cseq += 1;

        if let Some(contact) = &self.contact {
            request.headers.insert_named(contact);
        }

        request.headers.insert_named(&Expires(expires));

        request
    }

    fn fail(&mut self, failure: RegistrationFailure) -> RegistrationEvent {
        log::debug!("Registration failed, {failure}");

        self.state = RegistrationState::Failed;
        self.refresh_at = None;
        self.pending = None;
        self.failure = Some(failure.clone());

        RegistrationEvent::Failed(failure)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::{endpoint, received_message, request_line, response_to};
    use sip_auth::{DigestAuthenticator, DigestCredentials, DigestUser};
    use sip_core::EndpointEvent;
    use sip_core::transaction::consts::T1;
    use sip_types::header::typed::Authorization;

    type Authenticator = DigestAuthenticator<DigestCredentials>;

    fn client(max_auth_retries: u32) -> RegistrationClient<Authenticator> {
        let config = RegistrarConfig {
            registrar: "sip:127.0.0.1:5070".parse().unwrap(),
            id: "<sip:demo@example.com>".parse().unwrap(),
            expiry: Duration::from_secs(60),
            refresh_margin: Duration::from_secs(5),
            max_auth_retries,
        };

        let mut credentials = DigestCredentials::new();
        credentials.set_default(DigestUser::new("demo", "secret"));

        RegistrationClient::new(config, DigestAuthenticator::new(credentials))
    }

    async fn respond(
        endpoint: &mut Endpoint,
        client: &mut RegistrationClient<Authenticator>,
        raw: bytes::Bytes,
    ) -> Option<RegistrationEvent> {
        let message = received_message(endpoint, raw);

        match endpoint.receive(message).await {
            Some(EndpointEvent::Response { key, response }) => {
                client.handle_response(endpoint, &key, response).await
            }
            other => panic!("expected response event, got {other:?}"),
        }
    }

    const CHALLENGE: &str =
        "WWW-Authenticate: Digest realm=\"example.com\", nonce=\"abc\", qop=\"auth\"\r\n";

    #[tokio::test]
    async fn registers_and_refreshes() {
        let (mut endpoint, mock) = endpoint();
        let mut client = client(1);

        let start = Instant::now();
        client.register(&mut endpoint).await.unwrap();
        assert_eq!(client.state(), RegistrationState::Registering);

        let sent = mock.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(request_line(&sent[0]).method, Method::REGISTER);

        let expires: Expires = sent[0].headers.get_named().unwrap();
        assert_eq!(expires.0, 60);

        let contact: Contact = sent[0].headers.get_named().unwrap();
        assert_eq!(contact.uri.uri.to_string(), "sip:demo@127.0.0.1:5060");

        let event = respond(
            &mut endpoint,
            &mut client,
            response_to(
                &sent[0],
                200,
                "Contact: <sip:demo@127.0.0.1:5060>;expires=30\r\n",
                "",
            ),
        )
        .await;

        assert_eq!(event, Some(RegistrationEvent::Registered { expires: Some(30) }));
        assert_eq!(client.state(), RegistrationState::Registered);

        // the requested expiry drives the refresh, not the granted one
        let refresh_at = client.timeout().unwrap();
        assert!(refresh_at >= start + Duration::from_secs(55));
        assert!(refresh_at <= Instant::now() + Duration::from_secs(55));

        assert!(client.poll(&mut endpoint, start).await.is_none());
        assert!(mock.take_sent().is_empty());

        assert!(client.poll(&mut endpoint, refresh_at).await.is_none());
        assert_eq!(client.state(), RegistrationState::Refreshing);
        assert!(client.timeout().is_none());

        let refresh = mock.take_sent();
        assert_eq!(refresh.len(), 1);

        let first_cseq: CSeq = sent[0].headers.get_named().unwrap();
        let second_cseq: CSeq = refresh[0].headers.get_named().unwrap();
        assert_eq!(second_cseq.cseq, first_cseq.cseq + 1);
        assert_eq!(
            refresh[0].headers.get(&Name::CALL_ID),
            sent[0].headers.get(&Name::CALL_ID)
        );
    }

    #[tokio::test]
    async fn single_challenge_retry() {
        let (mut endpoint, mock) = endpoint();
        let mut client = client(1);

        client.register(&mut endpoint).await.unwrap();
        let sent = mock.take_sent();

        let event = respond(
            &mut endpoint,
            &mut client,
            response_to(&sent[0], 401, CHALLENGE, ""),
        )
        .await;
        assert!(event.is_none());

        let retry = mock.take_sent();
        assert_eq!(retry.len(), 1);
        assert_eq!(request_line(&retry[0]).method, Method::REGISTER);
        assert!(retry[0].headers.get_named::<Authorization>().is_ok());

        // second challenge is terminal and keeps the 401
        let event = respond(
            &mut endpoint,
            &mut client,
            response_to(&retry[0], 401, CHALLENGE, ""),
        )
        .await;

        assert_eq!(
            event,
            Some(RegistrationEvent::Failed(RegistrationFailure::Rejected {
                code: StatusCode::UNAUTHORIZED,
                reason: Some(BytesStr::from_static("Whatever")),
            }))
        );
        assert_eq!(client.state(), RegistrationState::Failed);
        assert_eq!(client.last_response().unwrap().0, StatusCode::UNAUTHORIZED);
        assert!(client.timeout().is_none());

        // no third request
        assert!(mock.take_sent().is_empty());
    }

    #[tokio::test]
    async fn challenge_without_retries_fails() {
        let (mut endpoint, mock) = endpoint();
        let mut client = client(0);

        client.register(&mut endpoint).await.unwrap();
        let sent = mock.take_sent();

        let event = respond(
            &mut endpoint,
            &mut client,
            response_to(&sent[0], 407, CHALLENGE, ""),
        )
        .await;

        assert!(matches!(
            event,
            Some(RegistrationEvent::Failed(RegistrationFailure::Rejected { code, .. }))
                if code == StatusCode::PROXY_AUTHENTICATION_REQUIRED
        ));
        assert!(mock.take_sent().is_empty());
    }

    #[tokio::test]
    async fn rejection_fails_without_refresh() {
        let (mut endpoint, mock) = endpoint();
        let mut client = client(1);

        client.register(&mut endpoint).await.unwrap();
        let sent = mock.take_sent();

        let event = respond(
            &mut endpoint,
            &mut client,
            response_to(&sent[0], 403, "", ""),
        )
        .await;

        let Some(RegistrationEvent::Failed(failure)) = event else {
            panic!("expected failure");
        };

        assert_eq!(failure.to_string(), "403 Whatever");
        assert_eq!(client.state(), RegistrationState::Failed);
        assert!(client.timeout().is_none());
    }

    #[tokio::test]
    async fn timeout_fails() {
        let (mut endpoint, _mock) = endpoint();
        let mut client = client(1);

        let start = Instant::now();
        client.register(&mut endpoint).await.unwrap();

        let events = endpoint.poll_timeouts(start + T1 * 65).await;
        assert_eq!(events.len(), 1);

        let EndpointEvent::TimedOut { key } = &events[0] else {
            panic!("expected timeout");
        };

        assert_eq!(
            client.handle_timeout(key),
            Some(RegistrationEvent::Failed(RegistrationFailure::TimedOut))
        );
        assert_eq!(client.failure(), Some(&RegistrationFailure::TimedOut));
    }

    #[tokio::test]
    async fn stop_abandons_pending_request() {
        let (mut endpoint, mock) = endpoint();
        let mut client = client(1);

        client.register(&mut endpoint).await.unwrap();
        assert_eq!(endpoint.pending_transactions(), 1);

        client.stop(&mut endpoint);

        assert_eq!(client.state(), RegistrationState::Deregistered);
        assert_eq!(endpoint.pending_transactions(), 0);
        assert!(client.timeout().is_none());

        // only the initial REGISTER, nothing removing the binding
        assert_eq!(mock.take_sent().len(), 1);
    }
}
