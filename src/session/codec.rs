use std::io::{Cursor, Error, Read};
use std::result::Result;

use byteorder::{NetworkEndian, ReadBytesExt};
use bytes::{Buf, BufMut, BytesMut};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed};
use twoway::find_bytes;

use crate::wire::{Header, Message, Negotiated, HEADER_LEN, MARKER};

pub type MessageProtocol = Framed<TcpStream, MessageCodec>;

/// Frames BGP messages over TCP. The codec holds the session's
/// `Negotiated` view; the manager swaps it in after the OPEN exchange so
/// later UPDATE parsing sees the agreed ASN width and ADD-PATH state.
#[derive(Debug, Default)]
pub struct MessageCodec {
    negotiated: Negotiated,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_negotiated(&mut self, negotiated: Negotiated) {
        self.negotiated = negotiated;
    }

    pub fn negotiated(&self) -> &Negotiated {
        &self.negotiated
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    // Look for a whole BGP message (marker + length) before decoding
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Error> {
        match find_msg_range(buf) {
            Some(range) => {
                let mut cursor = Cursor::new(&buf[range.start..range.stop]);
                let header =
                    Header::unpack_header(&mut cursor, self.negotiated.max_message_size())?;
                let message = Message::unpack_message(&mut cursor, header, &self.negotiated)?;
                buf.advance(range.stop);
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, message: Message, buf: &mut BytesMut) -> Result<(), Error> {
        message.pack(&mut buf.writer(), &self.negotiated)
    }
}

#[derive(Debug)]
struct MsgRange {
    start: usize,
    stop: usize,
}

/// Given a stream of bytes, find the start and end of one BGP message;
/// None until a whole message is buffered
fn find_msg_range(data: &[u8]) -> Option<MsgRange> {
    let start = find_bytes(data, &MARKER)?;
    let mut buf = data.split_at(start).1;
    if buf.len() < HEADER_LEN {
        return None;
    }
    let mut preamble = [0u8; 16];
    let _ = buf.read_exact(&mut preamble);
    let length = buf.read_u16::<NetworkEndian>().ok()? as usize;
    if data.len() < start + length {
        return None;
    }
    Some(MsgRange {
        start,
        stop: start + length,
    })
}
