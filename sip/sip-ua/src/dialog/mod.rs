use crate::util::{insert_allow, random_sequence_number};
use bytesstr::BytesStr;
use sip_core::transport::TargetTransportInfo;
use sip_core::{Endpoint, IncomingRequest, Request, Response, TsxResponse};
use sip_types::header::typed::{CSeq, CallId, Contact, FromTo, RecordRoute, Route};
use sip_types::uri::{NameAddr, SipUri};
use sip_types::{Method, Name, StatusCode};

mod key;

pub use key::DialogKey;

#[derive(Debug)]
pub struct Dialog {
    /// Local CSeq number, increments with every request constructed using this dialog
    pub local_cseq: u32,

    /// Highest remote CSeq number seen inside the dialog
    pub peer_cseq: Option<u32>,

    /// Local tag, also set on `local`
    pub local_tag: BytesStr,

    /// From header of requests sent inside the dialog
    pub local: FromTo,

    /// To header of requests sent inside the dialog
    ///
    /// Tag may be `None` for peers that don't set one
    pub peer: FromTo,

    pub local_contact: Contact,

    /// Remote target, request uri of all requests inside the dialog
    pub peer_target: SipUri,

    pub call_id: CallId,

    /// Dialog's Route set, must be set with every request
    pub route_set: Vec<Route>,

    /// Where requests inside the dialog are sent to
    pub target_tp_info: TargetTransportInfo,
}

impl Dialog {
    /// Create the dialog of an INVITE we sent from the 2xx response
    pub fn new_client(
        local: NameAddr,
        local_tag: BytesStr,
        call_id: CallId,
        local_cseq: u32,
        local_contact: Contact,
        response: &TsxResponse,
        target_tp_info: TargetTransportInfo,
    ) -> Self {
        let peer = response.base_headers.to.clone();

        let peer_target = response
            .headers
            .get_named::<Contact>()
            .map(|contact| contact.uri.uri)
            .unwrap_or_else(|_| peer.uri.uri.clone());

        // client side route set is the reversed Record-Route list
        let mut route_set = record_routes(&response.headers);
        route_set.reverse();

        Self {
            local_cseq,
            peer_cseq: None,
            local: FromTo::new(local, Some(local_tag.clone())),
            local_tag,
            peer,
            local_contact,
            peer_target,
            call_id,
            route_set,
            target_tp_info,
        }
    }

    /// Create a dialog from an incoming INVITE, using `local_tag` as To tag
    pub fn new_server(request: &IncomingRequest, local_tag: BytesStr, local_contact: Contact) -> Self {
        let base_headers = &request.base_headers;

        // On server dialogs the from/to headers are reversed
        // since they are taken from an incoming request
        let mut local = base_headers.to.clone();
        local.tag = Some(local_tag.clone());

        let peer = base_headers.from.clone();

        let peer_target = request
            .headers
            .get_named::<Contact>()
            .map(|contact| contact.uri.uri)
            .unwrap_or_else(|_| peer.uri.uri.clone());

        Self {
            local_cseq: random_sequence_number(),
            peer_cseq: Some(base_headers.cseq.cseq),
            local_tag,
            local,
            peer,
            local_contact,
            peer_target,
            call_id: base_headers.call_id.clone(),
            route_set: record_routes(&request.headers),
            target_tp_info: TargetTransportInfo {
                via_host_port: None,
                transport: Some((request.transport.clone(), request.source)),
            },
        }
    }

    /// Create a key that the dialog can be identified with
    pub fn key(&self) -> DialogKey {
        DialogKey {
            call_id: self.call_id.0.clone(),
            peer_tag: self.peer.tag.clone(),
            local_tag: self.local_tag.clone(),
        }
    }

    pub fn matches(&self, request: &IncomingRequest) -> bool {
        DialogKey::from_incoming(request).is_some_and(|key| key == self.key())
    }

    /// Record the CSeq of a request inside the dialog.
    ///
    /// Returns false if the request is out of order and must be rejected.
    pub fn receive_peer_cseq(&mut self, request: &IncomingRequest) -> bool {
        let method = &request.line.method;

        if *method == Method::ACK || *method == Method::CANCEL {
            return true;
        }

        let cseq = request.base_headers.cseq.cseq;

        match self.peer_cseq {
            Some(last) if cseq <= last => false,
            _ => {
                self.peer_cseq = Some(cseq);
                true
            }
        }
    }

    pub fn create_request(&mut self, method: Method) -> Request {
        let mut request = Request::new(method.clone(), self.peer_target.clone());

        let cseq = CSeq::new(self.local_cseq, method);
        self.local_cseq += 1;

        self.insert_dialog_headers(&mut request, cseq);

        request
    }

    /// ACK for a 2xx response to the INVITE sent with `invite_cseq`
    pub fn create_ack(&self, invite_cseq: u32) -> Request {
        let mut request = Request::new(Method::ACK, self.peer_target.clone());

        self.insert_dialog_headers(&mut request, CSeq::new(invite_cseq, Method::ACK));

        request
    }

    fn insert_dialog_headers(&self, request: &mut Request, cseq: CSeq) {
        request.headers.insert_type(Name::FROM, &self.local);
        request.headers.insert_type(Name::TO, &self.peer);
        request.headers.insert_named(&self.call_id);
        request.headers.insert_named(&cseq);

        for route in &self.route_set {
            request.headers.insert_named(route);
        }
    }

    /// Response to a request inside the dialog, carries the local tag and for INVITE
    /// also Contact and Allow
    pub fn create_response(
        &self,
        endpoint: &Endpoint,
        request: &IncomingRequest,
        code: StatusCode,
        reason: Option<BytesStr>,
    ) -> Response {
        let mut response = endpoint.create_response(request, code, reason);

        if request.base_headers.to.tag.is_none() && code != StatusCode::TRYING {
            response.headers.remove(&Name::TO);
            response.headers.insert_type(Name::TO, &self.local);
        }

        if request.line.method == Method::INVITE {
            let code = code.into_u16();

            if let 101..=399 | 485 = code {
                response.headers.insert_named(&self.local_contact);
            }

            if let 180..=189 | 200..=299 | 405 = code {
                insert_allow(endpoint, &mut response.headers);
            }
        }

        response
    }
}

fn record_routes(headers: &sip_types::Headers) -> Vec<Route> {
    match headers.get_all_named::<RecordRoute>() {
        Ok(record_routes) => record_routes.into_iter().map(Route::from).collect(),
        Err(e) => {
            log::warn!("Ignoring malformed Record-Route, {e}");
            vec![]
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::{MockTransport, received_request};
    use sip_core::transport::TpHandle;

    fn invite(endpoint: &Endpoint) -> IncomingRequest {
        received_request(
            endpoint,
            "INVITE sip:bob@127.0.0.1:5060 SIP/2.0\r\n\
            Via: SIP/2.0/UDP 127.0.0.1:5070;branch=z9hG4bKinvite\r\n\
            From: <sip:alice@127.0.0.1>;tag=peer\r\n\
            To: <sip:bob@127.0.0.1>\r\n\
            Call-ID: dialog-call\r\n\
            CSeq: 7 INVITE\r\n\
            Contact: <sip:alice@127.0.0.1:5070>\r\n\
            Record-Route: <sip:proxy1.example.com;lr>, <sip:proxy2.example.com;lr>\r\n\
            \r\n",
        )
    }

    fn endpoint() -> Endpoint {
        let mock = MockTransport::new("127.0.0.1:5060".parse().unwrap());

        let mut builder = Endpoint::builder();
        builder
            .add_allow(Method::INVITE)
            .add_transport(TpHandle::new(mock));
        builder.build()
    }

    #[tokio::test]
    async fn server_dialog_from_invite() {
        let endpoint = endpoint();
        let request = invite(&endpoint);

        let contact = Contact::new(NameAddr::uri("sip:bob@127.0.0.1:5060".parse().unwrap()));
        let mut dialog = Dialog::new_server(&request, BytesStr::from_static("local"), contact);

        assert!(!dialog.matches(&request));
        assert_eq!(dialog.peer_cseq, Some(7));
        assert_eq!(dialog.peer_target.to_string(), "sip:alice@127.0.0.1:5070");
        assert_eq!(dialog.route_set.len(), 2);
        assert_eq!(
            dialog.route_set[0].uri.uri.host_port.to_string(),
            "proxy1.example.com"
        );

        let bye = dialog.create_request(Method::BYE);
        let to: FromTo = bye.headers.get_type(&Name::TO).unwrap();
        let from: FromTo = bye.headers.get_type(&Name::FROM).unwrap();
        assert_eq!(to.tag.as_deref(), Some("peer"));
        assert_eq!(from.tag.as_deref(), Some("local"));
        assert_eq!(bye.headers.get_all(&Name::ROUTE).count(), 2);

        let response = dialog.create_response(&endpoint, &request, StatusCode::OK, None);
        let to: FromTo = response.headers.get_type(&Name::TO).unwrap();
        assert_eq!(to.tag.as_deref(), Some("local"));
        assert!(response.headers.contains(&Name::CONTACT));
        assert!(response.headers.contains(&Name::ALLOW));
    }

    #[tokio::test]
    async fn peer_cseq_must_increase() {
        let endpoint = endpoint();
        let request = invite(&endpoint);

        let contact = Contact::new(NameAddr::uri("sip:bob@127.0.0.1:5060".parse().unwrap()));
        let mut dialog = Dialog::new_server(&request, BytesStr::from_static("local"), contact);

        assert!(!dialog.receive_peer_cseq(&request));

        let bye = received_request(
            &endpoint,
            "BYE sip:bob@127.0.0.1:5060 SIP/2.0\r\n\
            Via: SIP/2.0/UDP 127.0.0.1:5070;branch=z9hG4bKbye\r\n\
            From: <sip:alice@127.0.0.1>;tag=peer\r\n\
            To: <sip:bob@127.0.0.1>;tag=local\r\n\
            Call-ID: dialog-call\r\n\
            CSeq: 8 BYE\r\n\
            \r\n",
        );

        assert!(dialog.matches(&bye));
        assert!(dialog.receive_peer_cseq(&bye));
        assert_eq!(dialog.peer_cseq, Some(8));
    }
}
