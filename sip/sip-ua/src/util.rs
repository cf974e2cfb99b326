use bytes::Bytes;
use bytesstr::BytesStr;
use rand::{Rng, distr::Alphanumeric, rng};
use sip_core::Endpoint;
use sip_types::header::typed::{Contact, ContentType};
use sip_types::host::HostPort;
use sip_types::uri::{NameAddr, SipUri};
use sip_types::{Headers, Method, Name};

pub const CONTENT_TYPE_SDP: &str = "application/sdp";

pub fn random_string() -> BytesStr {
    rng()
        .sample_iter(Alphanumeric)
        .take(30)
        .map(char::from)
        .collect::<String>()
        .into()
}

pub fn random_sequence_number() -> u32 {
    rand::rng().random_range(0..(u32::MAX >> 1))
}

/// Contact pointing at the given address, using `user` as user part
pub fn contact_for(user: Option<BytesStr>, sent_by: impl Into<HostPort>) -> Contact {
    let mut uri = SipUri::new(sent_by.into());
    uri.user = user;

    Contact::new(NameAddr::uri(uri))
}

/// Returns the SDP body of a message.
///
/// `Ok(None)` if there is no body at all, `Err` carries the content type of a body that
/// isn't SDP.
pub(crate) fn sdp_body<'b>(
    headers: &Headers,
    body: &'b Bytes,
) -> Result<Option<&'b Bytes>, BytesStr> {
    if body.is_empty() {
        return Ok(None);
    }

    match headers.get_named::<ContentType>() {
        Ok(content_type) if content_type.is(CONTENT_TYPE_SDP) => Ok(Some(body)),
        Ok(content_type) => Err(content_type.0),
        Err(_) => Err(BytesStr::from_static("<missing>")),
    }
}

pub(crate) fn set_sdp_body(headers: &mut Headers, body: &mut Bytes, sdp: Bytes) {
    headers.insert_named(&ContentType(BytesStr::from_static(CONTENT_TYPE_SDP)));
    *body = sdp;
}

pub(crate) fn insert_allow(endpoint: &Endpoint, headers: &mut Headers) {
    let allow = endpoint
        .allowed()
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ");

    headers.insert(Name::ALLOW, allow);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sdp_body_requires_content_type() {
        let body = Bytes::from_static(b"v=0\r\n");

        let mut headers = Headers::new();
        assert!(sdp_body(&headers, &Bytes::new()).unwrap().is_none());
        assert!(sdp_body(&headers, &body).is_err());

        headers.insert(Name::CONTENT_TYPE, "text/plain");
        assert_eq!(&*sdp_body(&headers, &body).unwrap_err(), "text/plain");

        headers.remove(&Name::CONTENT_TYPE);
        headers.insert(Name::CONTENT_TYPE, "application/sdp");
        assert_eq!(sdp_body(&headers, &body).unwrap(), Some(&body));
    }

    #[test]
    fn contact_uses_sent_by() {
        let addr: std::net::SocketAddr = "192.0.2.1:5060".parse().unwrap();
        let contact = contact_for(Some(BytesStr::from_static("demo")), addr);

        assert_eq!(contact.to_string(), "<sip:demo@192.0.2.1:5060>");
    }

    #[test]
    fn random_values() {
        assert_eq!(random_string().len(), 30);
        assert!(random_sequence_number() < u32::MAX >> 1);
    }
}
