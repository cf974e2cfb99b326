//! # SIP User Agent
//!
//! Sans-IO state machines of a minimal SIP user agent built on top of a [`sip_core::Endpoint`].
//!
//! Notable types are
//!
//! - [`RegistrationClient`] keeps a binding at a SIP registrar alive
//! - [`CallSession`] a single INVITE session, either placed or accepted, with SDP offer/answer
//! - [`SessionListener`] admits inbound calls and rejects what belongs to no call
//!
//! None of them own a socket or a timer. Received messages, timeouts and responses are passed
//! in by the owner of the endpoint, which also waits for the deadlines they report.
//!
//! The modules [`dialog`] and [`util`] contain implementation details used inside the top
//! level abstractions.

use session::MediaDescription;
use sip_core::Endpoint;

pub mod dialog;
pub mod util;

mod call;
mod listener;
mod registration;
#[cfg(test)]
mod test_util;

pub use call::{
    AcceptError, CallConfig, CallError, CallEvent, CallRole, CallSession, CallState, CloseReason,
};
pub use listener::SessionListener;
pub use registration::{
    RegisterError, RegistrarConfig, RegistrationClient, RegistrationEvent, RegistrationFailure,
    RegistrationState,
};

/// Everything a call needs from its owner while handling a single event
pub struct CallContext<'a> {
    pub endpoint: &'a mut Endpoint,
    /// Local media offered and answered by the call, shared by all calls of the agent
    pub media: &'a mut MediaDescription,
}
