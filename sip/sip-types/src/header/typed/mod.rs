//! Typed representations of header values

mod auth;
mod call_id;
mod contact;
mod cseq;
mod from_to;
mod routing;
mod via;
mod simple;

pub use auth::{
    Algorithm, AuthChallenge, AuthParam, AuthResponse, Authorization, DigestChallenge,
    DigestResponse, ProxyAuthenticate, ProxyAuthorization, QopOption, QopResponse,
    WwwAuthenticate,
};
pub use call_id::CallId;
pub use contact::Contact;
pub use cseq::CSeq;
pub use from_to::FromTo;
pub use routing::{RecordRoute, Route};
pub use simple::{ContentType, Expires, MaxForwards, MinExpires};
pub use via::Via;
