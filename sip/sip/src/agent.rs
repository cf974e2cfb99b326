use crate::config::Config;
use session::{MediaChannel, MediaDescription, ReceivedDatagram};
use sip_auth::{DigestAuthenticator, DigestCredentials, DigestUser};
use sip_core::transport::TransportEvent;
use sip_core::transport::tcp::Tcp;
use sip_core::transport::udp::Udp;
use sip_core::transaction::TsxKey;
use sip_core::{Endpoint, EndpointEvent, IncomingRequest, TsxResponse};
use sip_types::Method;
use sip_ua::{
    CallConfig, CallContext, CallError, CallEvent, CallSession, RegistrarConfig,
    RegistrationClient, RegistrationEvent, SessionListener,
};
use std::io;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Interval of the RTCP receiver reports sent while a remote is known
const RTCP_INTERVAL: Duration = Duration::from_secs(5);

type Authenticator = DigestAuthenticator<DigestCredentials>;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("failed to bind SIP transport, {0}")]
    SipTransport(#[source] io::Error),
    #[error("rtp listen error, {0}")]
    Media(#[source] io::Error),
    #[error("session connect error, {0}")]
    Connect(#[from] CallError),
}

/// The user agent: one endpoint, one registration, at most one call and the media of that call.
///
/// Everything is owned by the agent and driven from [`Agent::run`], handlers never overlap.
pub struct Agent {
    config: Config,

    endpoint: Endpoint,
    sip_events: mpsc::Receiver<TransportEvent>,

    media: MediaDescription,
    channel: MediaChannel,
    media_events: mpsc::Receiver<ReceivedDatagram>,

    listener: SessionListener,
    registration: Option<RegistrationClient<Authenticator>>,

    /// The active call, cleared once it is terminated
    call: Option<CallSession<Authenticator>>,
    /// Terminated call kept around to answer late responses while draining
    closing: Option<CallSession<Authenticator>>,

    finished: bool,
}

impl Agent {
    /// Bind the SIP transports and the RTP/RTCP port pair
    pub async fn bind(config: Config) -> Result<Self, AgentError> {
        let (sip_sender, sip_events) = mpsc::channel(64);

        let udp = Udp::spawn((config.local_ip, config.sip_port), sip_sender.clone())
            .await
            .map_err(AgentError::SipTransport)?;

        let sip_port = udp.bound().port();

        let mut builder = Endpoint::builder();
        builder
            .add_allow(Method::INVITE)
            .add_allow(Method::BYE)
            .add_allow(Method::OPTIONS)
            .set_user_agent(concat!("sipua/", env!("CARGO_PKG_VERSION")))
            .add_transport(udp);

        // TCP shares the port of the UDP transport if it is free
        match Tcp::spawn((config.local_ip, sip_port), sip_sender).await {
            Ok(tcp) => {
                builder.add_transport(tcp);
            }
            Err(e) => log::warn!("Failed to bind TCP, continuing with UDP only, {e}"),
        }

        let endpoint = builder.build();

        let (media_sender, media_events) = mpsc::channel(256);

        let channel = MediaChannel::bind(config.local_ip, config.rtp_ports.clone(), media_sender)
            .await
            .map_err(AgentError::Media)?;

        let port = channel.local_addr().port();
        log::info!("local RTP port is {port}");

        let media = MediaDescription::new(config.local_ip, port, config.formats.clone());

        Ok(Self {
            config,
            endpoint,
            sip_events,
            media,
            channel,
            media_events,
            listener: SessionListener::new(),
            registration: None,
            call: None,
            closing: None,
            finished: false,
        })
    }

    fn authenticator(&self) -> Authenticator {
        let mut credentials = DigestCredentials::new();
        credentials.set_default(DigestUser::new(
            self.config.username.clone(),
            self.config.password.clone(),
        ));

        DigestAuthenticator::new(credentials)
    }

    /// Invite the configured peer or register, then handle events until a termination signal
    /// arrives or the call is closed
    pub async fn run(mut self) -> Result<(), AgentError> {
        self.start().await?;

        let signal = shutdown_signal();
        tokio::pin!(signal);

        let mut rtcp = tokio::time::interval(RTCP_INTERVAL);
        rtcp.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.finished {
            let deadline = self.next_deadline();

            tokio::select! {
                Some(event) = self.sip_events.recv() => self.on_transport_event(event).await,
                Some(datagram) = self.media_events.recv() => self.channel.receive(datagram),
                _ = sleep_until(deadline) => self.on_timeout(Instant::now()).await,
                _ = rtcp.tick() => self.channel.send_receiver_report().await,
                result = &mut signal => {
                    match result {
                        Ok(name) => log::info!("terminating on {name}..."),
                        Err(e) => log::warn!("Failed to wait for termination signal, {e}"),
                    }

                    break;
                }
            }
        }

        self.shutdown().await;

        Ok(())
    }

    async fn start(&mut self) -> Result<(), AgentError> {
        if let Some(peer) = self.config.peer.clone() {
            log::info!("inviting <{peer}>...");

            let config = CallConfig {
                id: self.config.id.clone(),
                target: peer,
                max_auth_retries: self.config.max_auth_retries,
            };

            let authenticator = self.authenticator();

            let mut ctx = CallContext {
                endpoint: &mut self.endpoint,
                media: &mut self.media,
            };

            self.call = Some(CallSession::connect(&mut ctx, config, authenticator).await?);

            return Ok(());
        }

        let config = RegistrarConfig {
            registrar: self.config.registrar.clone(),
            id: self.config.id.clone(),
            expiry: self.config.expiry,
            refresh_margin: self.config.refresh_margin,
            max_auth_retries: self.config.max_auth_retries,
        };

        log::info!("registering <{}>...", config.id.uri);

        let registration = self
            .registration
            .insert(RegistrationClient::new(config, self.authenticator()));

        // a failed registration leaves the agent able to answer calls
        if let Err(e) = registration.register(&mut self.endpoint).await {
            log::info!("register error: {e}");
        }

        Ok(())
    }

    fn next_deadline(&self) -> Option<Instant> {
        let refresh = self
            .registration
            .as_ref()
            .and_then(RegistrationClient::timeout);

        match (self.endpoint.timeout(), refresh) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(message) => {
                if let Some(event) = self.endpoint.receive(message).await {
                    self.on_endpoint_event(event).await;
                }
            }
            TransportEvent::ConnectionEstablished { transport, remote } => {
                log::info!("{transport} connection to {remote} established");
            }
            TransportEvent::ConnectionClosed {
                transport,
                remote,
                reason,
            } => {
                log::info!("{transport} connection to {remote} closed, {reason}");
            }
        }
    }

    async fn on_timeout(&mut self, now: Instant) {
        for event in self.endpoint.poll_timeouts(now).await {
            self.on_endpoint_event(event).await;
        }

        if let Some(registration) = &mut self.registration {
            if let Some(event) = registration.poll(&mut self.endpoint, now).await {
                self.on_registration_event(event);
            }
        }
    }

    async fn on_endpoint_event(&mut self, event: EndpointEvent) {
        match event {
            EndpointEvent::Request(request) => self.on_request(request).await,
            EndpointEvent::Response { key, response } => self.on_response(key, response).await,
            EndpointEvent::TimedOut { key } | EndpointEvent::AckTimedOut { key } => {
                self.on_transaction_timeout(key).await
            }
        }
    }

    async fn on_response(&mut self, key: TsxKey, response: TsxResponse) {
        if let Some(registration) = self
            .registration
            .as_mut()
            .filter(|registration| registration.owns(&key))
        {
            if let Some(event) = registration
                .handle_response(&mut self.endpoint, &key, response)
                .await
            {
                self.on_registration_event(event);
            }

            return;
        }

        let mut ctx = CallContext {
            endpoint: &mut self.endpoint,
            media: &mut self.media,
        };

        let event = match owner(&mut self.call, &mut self.closing, |call| call.owns(&key)) {
            Some(call) => call.handle_response(&mut ctx, &key, response).await,
            None => {
                log::debug!("Dropping {} without owner", response.line);
                None
            }
        };

        if let Some(event) = event {
            self.on_call_event(event);
        }
    }

    async fn on_transaction_timeout(&mut self, key: TsxKey) {
        if let Some(event) = self
            .registration
            .as_mut()
            .and_then(|registration| registration.handle_timeout(&key))
        {
            self.on_registration_event(event);
            return;
        }

        let mut ctx = CallContext {
            endpoint: &mut self.endpoint,
            media: &mut self.media,
        };

        let event = match owner(&mut self.call, &mut self.closing, |call| call.owns(&key)) {
            Some(call) => call.handle_timeout(&mut ctx, &key).await,
            None => None,
        };

        if let Some(event) = event {
            self.on_call_event(event);
        }
    }

    async fn on_request(&mut self, request: IncomingRequest) {
        let mut ctx = CallContext {
            endpoint: &mut self.endpoint,
            media: &mut self.media,
        };

        let event = match owner(&mut self.call, &mut self.closing, |call| {
            call.matches(&request)
        }) {
            Some(call) => call.handle_request(&mut ctx, request).await,
            None => {
                self.listener
                    .on_incoming_request(&mut ctx, request, &mut self.call)
                    .await
            }
        };

        if let Some(event) = event {
            self.on_call_event(event);
        }
    }

    fn on_call_event(&mut self, event: CallEvent) {
        match event {
            CallEvent::Progress { code, reason } => {
                let reason = reason.as_deref().or(code.text()).unwrap_or_default();
                log::info!("session progress: {code} {reason}");
            }
            CallEvent::Established => {
                log::info!("session established");

                if self.call.as_ref().is_some_and(CallSession::pending_offer) {
                    log::debug!("SDP answer expected in ACK");
                    return;
                }

                self.update_media();
            }
            CallEvent::Negotiated => {
                log::info!("SDP answer received");
                self.update_media();
            }
            CallEvent::Closed(reason) => {
                log::info!("session closed: {reason}");

                self.channel.set_remote(None);
                self.media.reset_remote();

                if let Some(call) = self.call.take() {
                    self.closing = Some(call);
                }

                self.finished = true;
            }
        }
    }

    fn on_registration_event(&mut self, event: RegistrationEvent) {
        match event {
            RegistrationEvent::Registered { .. } => {
                let (code, reason) = self
                    .registration
                    .as_ref()
                    .and_then(RegistrationClient::last_response)
                    .map(|(code, reason)| (code.to_string(), reason.map(|r| r.to_string())))
                    .unwrap_or_default();

                log::info!("register reply: {code} {}", reason.unwrap_or_default());
            }
            RegistrationEvent::Failed(failure) => log::info!("register error: {failure}"),
        }
    }

    /// Point the media channel at the negotiated remote, or stop sending
    fn update_media(&mut self) {
        let Some(address) = self.media.remote_rtp_address() else {
            log::info!("SDP peer declined the media stream");
            self.channel.set_remote(None);
            return;
        };

        log::info!("SDP peer address: {address}");

        match self.media.resolve_common_format() {
            Some(format) => {
                log::info!("SDP media format: {format}");
                self.channel.set_remote(Some(address));
            }
            None => {
                log::info!("no common media format found");
                self.channel.set_remote(None);
            }
        }
    }

    async fn shutdown(&mut self) {
        self.listener.set_accepting(false);

        if let Some(mut call) = self.call.take() {
            let mut ctx = CallContext {
                endpoint: &mut self.endpoint,
                media: &mut self.media,
            };

            let event = call.terminate(&mut ctx).await;
            self.closing = Some(call);

            if let Some(event) = event {
                self.on_call_event(event);
            }
        }

        if let Some(registration) = &mut self.registration {
            registration.stop(&mut self.endpoint);
        }

        let deadline = Instant::now() + self.config.shutdown_timeout;

        while self.endpoint.pending_transactions() > 0 {
            if Instant::now() >= deadline {
                log::warn!(
                    "Shutdown timeout reached with {} transactions pending",
                    self.endpoint.pending_transactions()
                );
                break;
            }

            let wakeup = self
                .endpoint
                .timeout()
                .map_or(deadline, |timeout| timeout.min(deadline));

            tokio::select! {
                Some(event) = self.sip_events.recv() => self.on_transport_event(event).await,
                _ = sleep_until(Some(wakeup)) => self.on_timeout(Instant::now()).await,
            }
        }

        log::debug!("media counters: {:?}", self.channel.counters());
    }
}

/// The live call if `f` matches it, else the terminated call if that one matches
fn owner<'c, A>(
    call: &'c mut Option<CallSession<A>>,
    closing: &'c mut Option<CallSession<A>>,
    f: impl Fn(&CallSession<A>) -> bool,
) -> Option<&'c mut CallSession<A>> {
    if call.as_ref().is_some_and(&f) {
        return call.as_mut();
    }

    closing.as_mut().filter(|closing| f(closing))
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

async fn shutdown_signal() -> io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|_| "interrupt")
    }
}
