//! Client side SIP authentication
//!
//! Solves `WWW-Authenticate` and `Proxy-Authenticate` challenges of 401/407
//! responses. How often a request is retried is up to the user of the
//! [`ClientAuthenticator`].

use sip_types::Headers;
use sip_types::msg::{RequestLine, StatusLine};
use std::error::Error;
use std::fmt::Debug;

mod digest;

pub use digest::{
    CredentialResolver, DigestAuthenticator, DigestCredentials, DigestError, DigestUser,
};

/// SIP request authenticator
pub trait ClientAuthenticator {
    type Error: Error + Debug + Send + Sync + 'static;

    /// Add authorization headers for all realms that have been challenged before.
    ///
    /// Does nothing until a rejection has been handled.
    fn authorize_request(&mut self, line: &RequestLine, headers: &mut Headers);

    /// Handle a 401/407 response to `rejected_request`.
    ///
    /// Returns an error when the challenge cannot be answered, in which case no further
    /// request should be sent.
    fn handle_rejection(
        &mut self,
        rejected_request: RequestParts<'_>,
        reject_response: ResponseParts<'_>,
    ) -> Result<(), Self::Error>;
}

/// The request that was rejected
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'s> {
    pub line: &'s RequestLine,
    pub headers: &'s Headers,
    pub body: &'s [u8],
}

/// The response carrying the challenge
#[derive(Debug, Clone, Copy)]
pub struct ResponseParts<'s> {
    pub line: &'s StatusLine,
    pub headers: &'s Headers,
    pub body: &'s [u8],
}
