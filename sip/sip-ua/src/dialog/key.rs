use bytesstr::BytesStr;
use sip_core::IncomingRequest;

/// Identifies a dialog by Call-ID and both tags (RFC 3261 12)
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct DialogKey {
    pub call_id: BytesStr,
    pub peer_tag: Option<BytesStr>,
    pub local_tag: BytesStr,
}

impl DialogKey {
    /// Key of the dialog an incoming request belongs to, `None` if it is outside of any dialog
    pub fn from_incoming(request: &IncomingRequest) -> Option<Self> {
        let base_headers = &request.base_headers;

        Some(Self {
            call_id: base_headers.call_id.0.clone(),
            peer_tag: base_headers.from.tag.clone(),
            local_tag: base_headers.to.tag.clone()?,
        })
    }
}
