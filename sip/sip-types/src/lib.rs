//! SIP message types with parsing and printing
//!
//! Contains the building blocks used by the transport and transaction layer:
//! status codes, methods, URIs, header maps with typed header values and
//! complete message parsing.

#[macro_use]
mod macros;

mod code;
pub mod header;
pub mod host;
mod method;
pub mod msg;
pub mod parse;
pub mod uri;

pub use code::{CodeKind, StatusCode};
pub use header::Headers;
pub use header::name::Name;
pub use method::Method;
