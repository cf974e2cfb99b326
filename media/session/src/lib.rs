//! Media side of a call: offer/answer over a single audio stream and the RTP channel carrying it

mod channel;
mod description;
mod format;

pub use channel::{Component, Counters, MediaChannel, ReceivedDatagram};
pub use description::{DecodeError, EncodeError, MediaDescription};
pub use format::Format;
