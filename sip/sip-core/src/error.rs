use sip_types::header::HeaderError;
use sip_types::msg::ParseError;
use std::io;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("failed to resolve {0}")]
    Resolve(String),
    #[error("no transport available for {0}")]
    NoTransport(String),
    #[error("unknown transaction {0}")]
    UnknownTransaction(String),
    #[error("request timed out")]
    RequestTimedOut,
}
