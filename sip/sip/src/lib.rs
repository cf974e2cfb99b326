//! # sipua
//!
//! A minimal SIP user agent. Without a peer it registers its identity and waits for a single
//! inbound call, with a peer it places one call. SDP offer/answer selects one audio format
//! and the RTP/RTCP port pair of the call is pointed at the negotiated address.
//!
//! All SIP and media state lives in one [`Agent`] running on a single threaded event loop.

mod agent;
mod config;

pub use agent::{Agent, AgentError};
pub use config::{Args, Config, ConfigError};
