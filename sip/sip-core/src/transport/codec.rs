use bytes::{Buf, Bytes, BytesMut};
use sip_types::msg::{ParseError, message_length};
use std::io;
use tokio_util::codec::Decoder;

const MAX_MSG_SIZE: usize = u16::MAX as usize;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("receiving message too large")]
    MessageTooLarge,
    #[error("received message is malformed, {0}")]
    Malformed(#[from] ParseError),
}

#[derive(Debug)]
pub(crate) enum Item {
    Message(Bytes),
    KeepAliveRequest,
    KeepAliveResponse,
}

/// Frames SIP messages out of a byte stream using the `Content-Length` header
#[derive(Default)]
pub(crate) struct StreamingDecoder;

impl Decoder for StreamingDecoder {
    type Item = Item;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // strip leading newlines
        let whitespace_count = src.iter().take_while(|b| b.is_ascii_whitespace()).count();
        if whitespace_count > 0 {
            let is_keep_alive_request = src.starts_with(b"\r\n\r\n");
            let is_keep_alive_response = src.starts_with(b"\r\n");

            src.advance(whitespace_count);

            if is_keep_alive_request {
                return Ok(Some(Item::KeepAliveRequest));
            } else if is_keep_alive_response {
                return Ok(Some(Item::KeepAliveResponse));
            }
        }

        let Some(len) = message_length(src)? else {
            if src.len() > MAX_MSG_SIZE {
                src.clear();
                return Err(Error::MessageTooLarge);
            }

            return Ok(None);
        };

        if len > MAX_MSG_SIZE {
            src.clear();
            return Err(Error::MessageTooLarge);
        }

        Ok(Some(Item::Message(src.split_to(len).freeze())))
    }
}
