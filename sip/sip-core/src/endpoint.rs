use crate::transaction::{ClientTsx, Fired, ServerTsx, Transactions, TsxKey};
use crate::transport::resolver::{Resolver, TransportKind};
use crate::transport::{ReceivedMessage, TargetTransportInfo, TpHandle};
use crate::{BaseHeaders, Error, IncomingRequest, Request, Response, Result, TsxResponse};
use bytes::Bytes;
use bytesstr::BytesStr;
use sip_types::header::typed::{CSeq, MaxForwards, Via};
use sip_types::host::{Host, HostPort};
use sip_types::msg::{MessageLine, StatusLine};
use sip_types::uri::{Param, SipUri};
use sip_types::{Headers, Method, Name, StatusCode};
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

/// Something the user agent has to act on, returned by [`Endpoint::receive`] and
/// [`Endpoint::poll_timeouts`]
#[derive(Debug)]
pub enum EndpointEvent {
    /// A new request outside any existing transaction.
    ///
    /// Also used for ACKs to 2xx responses, which never belong to a transaction.
    Request(IncomingRequest),
    /// Response to a request sent with [`Endpoint::send_request`]
    Response { key: TsxKey, response: TsxResponse },
    /// The client transaction never got a final response
    TimedOut { key: TsxKey },
    /// A 2xx response to an INVITE was never acknowledged
    AckTimedOut { key: TsxKey },
}

/// The endpoint owns the transports and all transactions.
///
/// It does not spawn anything on its own: the owner passes received messages to
/// [`Endpoint::receive`] and calls [`Endpoint::poll_timeouts`] once [`Endpoint::timeout`]
/// is reached.
pub struct Endpoint {
    allow: Vec<Method>,
    user_agent: Option<BytesStr>,

    transports: Vec<TpHandle>,
    resolver: Resolver,

    transactions: Transactions,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("transports", &self.transports)
            .field("transactions", &self.transactions.len())
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// Construct a new [`EndpointBuilder`]
    pub fn builder() -> EndpointBuilder {
        EndpointBuilder::new()
    }

    /// Returns all methods this endpoint handles
    pub fn allowed(&self) -> &[Method] {
        &self.allow
    }

    pub fn transports(&self) -> &[TpHandle] {
        &self.transports
    }

    /// Create a VIA header with the given transport and branch
    pub fn create_via(
        &self,
        transport: &TpHandle,
        branch: &BytesStr,
        via_host_port: Option<HostPort>,
    ) -> Via {
        let mut via = Via::new(
            transport.name(),
            via_host_port.unwrap_or_else(|| transport.sent_by().into()),
            branch.clone(),
        );

        via.params.push(Param::name("rport"));
        via
    }

    /// Find a suitable transport for the given uri and resolve the destination address
    #[tracing::instrument(name = "select_transport", level = "debug", skip_all, fields(%uri))]
    pub async fn select_transport(&mut self, uri: &SipUri) -> Result<(TpHandle, SocketAddr)> {
        let servers = self.resolver.resolve_uri(uri).await?;
        let transport_param = uri.transport();

        for server in servers {
            let found = self.transports.iter().find(|tp| {
                let family_matches = tp.bound().is_ipv4() == server.address.is_ipv4();

                let kind_matches = match (transport_param, server.transport) {
                    (Some(param), _) => tp.matches_transport_param(param),
                    (None, Some(kind)) => kind.as_str() == tp.name(),
                    (None, None) => tp.name() == TransportKind::Udp.as_str(),
                };

                family_matches && kind_matches
            });

            if let Some(transport) = found {
                log::debug!("Selected {transport} for {}", server.address);
                return Ok((transport.clone(), server.address));
            }
        }

        Err(Error::NoTransport(uri.to_string()))
    }

    async fn target(
        &mut self,
        uri: &SipUri,
        target: &mut TargetTransportInfo,
    ) -> Result<(TpHandle, SocketAddr)> {
        if let Some((transport, destination)) = &target.transport {
            return Ok((transport.clone(), *destination));
        }

        let (transport, destination) = self.select_transport(uri).await?;
        target.transport = Some((transport.clone(), destination));

        Ok((transport, destination))
    }

    fn complete_headers(&self, headers: &mut Headers) {
        if !headers.contains(&Name::MAX_FORWARDS) {
            headers.insert_named(&MaxForwards(70));
        }

        if let Some(user_agent) = &self.user_agent {
            if !headers.contains(&Name::USER_AGENT) {
                headers.insert(Name::USER_AGENT, user_agent.clone());
            }
        }
    }

    /// Send a request inside a new client transaction.
    ///
    /// The topmost Via is added here. Responses are returned as [`EndpointEvent::Response`]
    /// with the returned key. ACK requests must be sent using [`Endpoint::send_ack`].
    #[tracing::instrument(level = "debug", skip_all, fields(method = %request.line.method))]
    pub async fn send_request(
        &mut self,
        mut request: Request,
        target: &mut TargetTransportInfo,
    ) -> Result<TsxKey> {
        debug_assert_ne!(request.line.method, Method::ACK);

        let (transport, destination) = self.target(&request.line.uri, target).await?;

        let key = TsxKey::client(&request.line.method);
        let via = self.create_via(&transport, key.branch(), target.via_host_port.clone());
        request.headers.insert_named_front(&via);
        self.complete_headers(&mut request.headers);

        let buffer = request.to_bytes();

        log::trace!("Sending {} to {destination} via {transport}", request.line);

        transport.send(&buffer, destination).await?;

        let tsx = ClientTsx::new(request, buffer, transport, destination, Instant::now());
        self.transactions.client.insert(key.clone(), tsx);

        Ok(key)
    }

    /// Cancel a pending INVITE transaction (RFC 3261 9.1)
    pub async fn send_cancel(&mut self, invite: &TsxKey) -> Result<TsxKey> {
        let tsx = self
            .transactions
            .client
            .get(invite)
            .ok_or_else(|| Error::UnknownTransaction(invite.to_string()))?;

        let original = tsx.request();
        let (transport, destination) = tsx.transport();
        let transport = transport.clone();

        let mut cancel = Request::new(Method::CANCEL, original.line.uri.clone());

        if let Some(via) = original.headers.get(&Name::VIA) {
            cancel.headers.insert(Name::VIA, via.clone());
        }

        cancel.headers.insert_named(&MaxForwards(70));
        cancel.headers.copy_from(&original.headers, &Name::FROM);
        cancel.headers.copy_from(&original.headers, &Name::TO);
        cancel.headers.copy_from(&original.headers, &Name::CALL_ID);

        let cseq: CSeq = original.headers.get_named()?;
        cancel
            .headers
            .insert_named(&CSeq::new(cseq.cseq, Method::CANCEL));
        cancel.headers.copy_from(&original.headers, &Name::ROUTE);

        let buffer = cancel.to_bytes();

        transport.send(&buffer, destination).await?;

        let key = TsxKey::client_with_branch(invite.branch().clone(), Method::CANCEL);
        let tsx = ClientTsx::new(cancel, buffer, transport, destination, Instant::now());
        self.transactions.client.insert(key.clone(), tsx);

        Ok(key)
    }

    /// Send an ACK for a 2xx response. It gets a new branch and is sent without transaction.
    pub async fn send_ack(&mut self, mut ack: Request, target: &mut TargetTransportInfo) -> Result<()> {
        let (transport, destination) = self.target(&ack.line.uri, target).await?;

        let branch = crate::transaction::generate_branch();
        let via = self.create_via(&transport, &branch, target.via_host_port.clone());
        ack.headers.remove(&Name::VIA);
        ack.headers.insert_named_front(&via);
        self.complete_headers(&mut ack.headers);

        transport.send(&ack.to_bytes(), destination).await?;

        Ok(())
    }

    /// Create a response to an incoming request with a given status code and optional reason
    pub fn create_response(
        &self,
        request: &IncomingRequest,
        code: StatusCode,
        reason: Option<BytesStr>,
    ) -> Response {
        assert_ne!(request.line.method, Method::ACK);

        let mut headers = Headers::new();

        for via in &request.base_headers.via {
            headers.insert_named(via);
        }

        headers.insert_type(Name::FROM, &request.base_headers.from);
        headers.insert_type(Name::TO, &request.base_headers.to);
        headers.insert_named(&request.base_headers.call_id);
        headers.insert_named(&request.base_headers.cseq);

        if let Some(user_agent) = &self.user_agent {
            headers.insert(Name::SERVER, user_agent.clone());
        }

        Response {
            line: StatusLine {
                code,
                reason: reason.or_else(|| code.text().map(BytesStr::from_static)),
            },
            headers,
            body: Bytes::new(),
        }
    }

    /// Send a response inside the server transaction of `request`
    pub async fn respond(&mut self, request: &IncomingRequest, response: Response) -> Result<()> {
        let tsx = self
            .transactions
            .server
            .get_mut(&request.tsx_key)
            .ok_or_else(|| Error::UnknownTransaction(request.tsx_key.to_string()))?;

        if tsx.has_final_response() && response.line.code.is_final() {
            log::warn!(
                "Dropping {} for {}, a final response was already sent",
                response.line,
                request.tsx_key
            );
            return Ok(());
        }

        tsx.respond(&response, Instant::now()).await?;

        Ok(())
    }

    /// Drop a transaction without waiting for anything
    pub fn abandon(&mut self, key: &TsxKey) {
        if self.transactions.remove(key) {
            log::debug!("Abandoned transaction {key}");
        }
    }

    /// Number of transactions still retransmitting or waiting on a response
    pub fn pending_transactions(&self) -> usize {
        self.transactions.pending()
    }

    /// The next instant [`Endpoint::poll_timeouts`] must be called
    pub fn timeout(&self) -> Option<Instant> {
        self.transactions.timeout()
    }

    /// Fire all transaction timers that are due at `now`
    pub async fn poll_timeouts(&mut self, now: Instant) -> Vec<EndpointEvent> {
        let mut events = vec![];

        let (client, server) = self.transactions.due(now);

        for key in client {
            let Some(tsx) = self.transactions.client.get_mut(&key) else {
                continue;
            };

            let fired = tsx.on_timeout(now).await;

            match fired {
                Fired::Pending => {}
                Fired::TimedOut => {
                    self.transactions.client.remove(&key);
                    events.push(EndpointEvent::TimedOut { key });
                }
                Fired::Terminated => {
                    self.transactions.client.remove(&key);
                }
            }
        }

        for key in server {
            let Some(tsx) = self.transactions.server.get_mut(&key) else {
                continue;
            };

            let fired = tsx.on_timeout(now).await;

            match fired {
                Fired::Pending => {}
                Fired::TimedOut => {
                    self.transactions.server.remove(&key);
                    events.push(EndpointEvent::AckTimedOut { key });
                }
                Fired::Terminated => {
                    self.transactions.server.remove(&key);
                }
            }
        }

        events
    }

    /// Pass a received message to the endpoint.
    ///
    /// Retransmissions are absorbed by their transactions, everything the user agent must
    /// handle is returned.
    #[tracing::instrument(level = "debug", skip_all, fields(%message))]
    pub async fn receive(&mut self, message: ReceivedMessage) -> Option<EndpointEvent> {
        let now = Instant::now();

        log::trace!("Received {message}");

        let base_headers = match BaseHeaders::extract_from(&message.headers) {
            Ok(base_headers) => base_headers,
            Err(e) => {
                log::warn!("Failed to get base headers for incoming message, {e}");
                return None;
            }
        };

        let ReceivedMessage {
            source,
            transport,
            line,
            headers,
            body,
        } = message;

        match line {
            MessageLine::Request(line) => {
                let mut base_headers = base_headers;
                add_received_rport(&mut base_headers.via[0], source);

                let Some(branch) = base_headers.top_via().branch().cloned() else {
                    log::warn!("Dropping {line} without branch");
                    return None;
                };

                let request = IncomingRequest {
                    source,
                    transport,
                    tsx_key: TsxKey::server(branch, line.method.clone()),
                    line,
                    base_headers,
                    headers,
                    body,
                };

                self.receive_request(request, now).await
            }
            MessageLine::Response(line) => {
                let response = TsxResponse {
                    source,
                    line,
                    base_headers,
                    headers,
                    body,
                };

                self.receive_response(response, now).await
            }
        }
    }

    async fn receive_response(
        &mut self,
        response: TsxResponse,
        now: Instant,
    ) -> Option<EndpointEvent> {
        let Some(branch) = response.base_headers.top_via().branch() else {
            log::warn!("Dropping response without branch");
            return None;
        };

        let key = TsxKey::client_with_branch(branch.clone(), response.base_headers.cseq.method.clone());

        let Some(tsx) = self.transactions.client.get_mut(&key) else {
            log::warn!("Received orphaned response {}", response.line);
            return None;
        };

        if tsx.receive(&response, now).await {
            Some(EndpointEvent::Response { key, response })
        } else {
            log::trace!("Transaction {key} absorbed {}", response.line);
            None
        }
    }

    async fn receive_request(
        &mut self,
        request: IncomingRequest,
        now: Instant,
    ) -> Option<EndpointEvent> {
        if request.line.method == Method::ACK {
            return self.receive_ack(request, now);
        }

        let key = request.tsx_key.clone();

        if let Some(tsx) = self.transactions.server.get(&key) {
            log::debug!("Received retransmission of {}", request.line);
            tsx.retransmit_response().await;
            return None;
        }

        let tsx = ServerTsx::new(
            request.line.method.clone(),
            request.base_headers.call_id.clone(),
            request.base_headers.cseq.cseq,
            request.transport.clone(),
            request.source,
        );
        self.transactions.server.insert(key, tsx);

        if !self.allow.contains(&request.line.method) {
            log::info!("Rejecting unsupported method {}", request.line.method);

            let mut response =
                self.create_response(&request, StatusCode::METHOD_NOT_ALLOWED, None);
            self.insert_allow(&mut response.headers);
            self.respond_logged(&request, response).await;

            return None;
        }

        if request.line.method == Method::OPTIONS && request.base_headers.to.tag.is_none() {
            let mut response = self.create_response(&request, StatusCode::OK, None);
            self.insert_allow(&mut response.headers);
            self.respond_logged(&request, response).await;

            return None;
        }

        Some(EndpointEvent::Request(request))
    }

    fn receive_ack(&mut self, request: IncomingRequest, now: Instant) -> Option<EndpointEvent> {
        // ACK for a non-2xx response shares the branch with the INVITE
        let invite_key = TsxKey::server(request.tsx_key.branch().clone(), Method::INVITE);

        if let Some(tsx) = self.transactions.server.get_mut(&invite_key) {
            if tsx.on_ack(now) {
                return None;
            }
        }

        let cseq = request.base_headers.cseq.cseq;

        let Some(accepted) = self
            .transactions
            .find_accepted(&request.base_headers.call_id, cseq)
        else {
            log::debug!("Dropping ACK without transaction");
            return None;
        };

        self.transactions.remove(&accepted);

        Some(EndpointEvent::Request(request))
    }

    fn insert_allow(&self, headers: &mut Headers) {
        let allow = self
            .allow
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");

        headers.insert(Name::ALLOW, allow);
    }

    async fn respond_logged(&mut self, request: &IncomingRequest, response: Response) {
        if let Err(e) = self.respond(request, response).await {
            log::warn!("Failed to respond to {}, {e}", request.line);
        }
    }
}

fn add_received_rport(via: &mut Via, source: SocketAddr) {
    let source_host: Host = source.ip().into();

    if source_host != via.sent_by.host {
        via.params.push(Param::value("received", source.ip().to_string()));
    }

    if via.params.take("rport").is_some() {
        via.params
            .push(Param::value("rport", source.port().to_string()));
    }
}

/// Builder instance for [`Endpoint`]
pub struct EndpointBuilder {
    allow: Vec<Method>,
    user_agent: Option<BytesStr>,
    transports: Vec<TpHandle>,
    resolver: Option<hickory_resolver::TokioResolver>,
}

impl Default for EndpointBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointBuilder {
    pub fn new() -> Self {
        Self {
            allow: vec![],
            user_agent: None,
            transports: vec![],
            resolver: None,
        }
    }

    /// Add a method the user agent handles, everything else is rejected with 405
    pub fn add_allow(&mut self, allowed: Method) -> &mut Self {
        if !self.allow.contains(&allowed) {
            self.allow.push(allowed);
        }
        self
    }

    pub fn set_user_agent<S: Into<BytesStr>>(&mut self, user_agent: S) -> &mut Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn add_transport(&mut self, transport: TpHandle) -> &mut Self {
        self.transports.push(transport);
        self
    }

    /// Set a DNS resolver, a resolver with the system configuration is created on first use otherwise
    pub fn set_dns_resolver(&mut self, dns_resolver: hickory_resolver::TokioResolver) -> &mut Self {
        self.resolver = Some(dns_resolver);
        self
    }

    pub fn build(&mut self) -> Endpoint {
        let mut allow = std::mem::take(&mut self.allow);

        // ACK and CANCEL are always handled by the transaction layer
        for method in [Method::ACK, Method::CANCEL] {
            if !allow.contains(&method) {
                allow.push(method);
            }
        }

        Endpoint {
            allow,
            user_agent: self.user_agent.take(),
            transports: std::mem::take(&mut self.transports),
            resolver: self.resolver.take().map(Resolver::new).unwrap_or_default(),
            transactions: Transactions::default(),
        }
    }
}
