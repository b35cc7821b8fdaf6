pub mod afi;
pub mod attributes;
pub mod capability;
pub mod error;
pub mod nlri;
pub mod notification;
pub mod open;
pub mod primitives;
pub mod refresh;
pub mod update;

pub use afi::{Family, AFI, SAFI};
pub use attributes::{ASPath, MpReachNlri, MpUnreachNlri, NextHop, PathAttribute};
pub use capability::{AddPathDirection, Capabilities, OpenCapability};
pub use error::{as_notification, NotificationError};
pub use nlri::{Nlri, RouteKey};
pub use notification::Notification;
pub use open::{Negotiated, Open, OpenParameter};
pub use refresh::{RefreshSubtype, RouteRefresh};
pub use update::Update;

use std::fmt;
use std::io::{Error, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// All-ones marker opening every message
pub const MARKER: [u8; 16] = [0xFF; 16];
/// Marker + length + type
pub const HEADER_LEN: usize = 19;

pub const MSG_OPEN: u8 = 1;
pub const MSG_UPDATE: u8 = 2;
pub const MSG_NOTIFICATION: u8 = 3;
pub const MSG_KEEPALIVE: u8 = 4;
pub const MSG_ROUTE_REFRESH: u8 = 5;

/// Counts bytes instead of storing them; used for the two-pass length
/// fields all over the wire format
pub(crate) struct SizeCalcWriter(pub usize);

impl Write for SizeCalcWriter {
    fn write(&mut self, b: &[u8]) -> Result<usize, Error> {
        self.0 += b.len();
        Ok(b.len())
    }

    fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// The fixed message header
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub length: u16,
    pub message_type: u8,
}

impl Header {
    /// Validate marker, length bounds and type code (RFC 4271 §6.1)
    pub fn unpack_header(stream: &mut impl Read, max_size: usize) -> Result<Header, Error> {
        let mut marker = [0u8; 16];
        stream.read_exact(&mut marker)?;
        if marker != MARKER {
            return Err(
                NotificationError::header(1, "Connection not synchronised (bad marker)").into(),
            );
        }
        let length = stream.read_u16::<BigEndian>()?;
        let message_type = stream.read_u8()?;
        if usize::from(length) < HEADER_LEN || usize::from(length) > max_size {
            return Err(NotificationError::header(
                2,
                format!("Bad message length {}", length),
            )
            .with_data(length.to_be_bytes().to_vec())
            .into());
        }
        if !(MSG_OPEN..=MSG_ROUTE_REFRESH).contains(&message_type) {
            return Err(NotificationError::header(
                3,
                format!("Bad message type {}", message_type),
            )
            .with_data(vec![message_type])
            .into());
        }
        Ok(Header {
            length,
            message_type,
        })
    }

    pub fn pack(&self, write: &mut impl Write) -> Result<(), Error> {
        write.write_all(&MARKER)?;
        write.write_u16::<BigEndian>(self.length)?;
        write.write_u8(self.message_type)
    }
}

/// A complete BGP message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Open(Open),
    Update(Update),
    Notification(Notification),
    KeepAlive,
    RouteRefresh(RouteRefresh),
}

impl Message {
    pub fn message_type(&self) -> u8 {
        match self {
            Message::Open(_) => MSG_OPEN,
            Message::Update(_) => MSG_UPDATE,
            Message::Notification(_) => MSG_NOTIFICATION,
            Message::KeepAlive => MSG_KEEPALIVE,
            Message::RouteRefresh(_) => MSG_ROUTE_REFRESH,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Open(_) => "OPEN",
            Message::Update(_) => "UPDATE",
            Message::Notification(_) => "NOTIFICATION",
            Message::KeepAlive => "KEEPALIVE",
            Message::RouteRefresh(_) => "ROUTE-REFRESH",
        }
    }

    /// Decode the body that followed `header`
    pub fn unpack_message(
        stream: &mut impl Read,
        header: Header,
        negotiated: &Negotiated,
    ) -> Result<Message, Error> {
        let body_len = usize::from(header.length) - HEADER_LEN;
        match header.message_type {
            MSG_OPEN => Ok(Message::Open(Open::unpack_open(stream)?)),
            MSG_UPDATE => Ok(Message::Update(Update::unpack_update(
                stream, body_len, negotiated,
            )?)),
            MSG_NOTIFICATION => Ok(Message::Notification(
                Notification::unpack_notification(stream, body_len)?,
            )),
            MSG_KEEPALIVE => {
                if body_len != 0 {
                    return Err(NotificationError::header(
                        2,
                        "KEEPALIVE must be exactly 19 bytes",
                    )
                    .into());
                }
                Ok(Message::KeepAlive)
            }
            MSG_ROUTE_REFRESH => Ok(Message::RouteRefresh(RouteRefresh::unpack_refresh(
                stream,
            )?)),
            _ => unreachable!("Header validation rejects unknown types"),
        }
    }

    fn pack_body(&self, write: &mut impl Write, negotiated: &Negotiated) -> Result<(), Error> {
        match self {
            Message::Open(open) => open.pack(write),
            Message::Update(update) => update.pack(write, negotiated),
            Message::Notification(notification) => notification.pack(write),
            Message::KeepAlive => Ok(()),
            Message::RouteRefresh(refresh) => refresh.pack(write),
        }
    }

    /// Encode with header; refuses to exceed the negotiated maximum size
    pub fn pack(&self, write: &mut impl Write, negotiated: &Negotiated) -> Result<(), Error> {
        let mut len = SizeCalcWriter(0);
        self.pack_body(&mut len, negotiated)?;
        let total = len.0 + HEADER_LEN;
        if total > negotiated.max_message_size() {
            return Err(Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "Message of {} bytes exceeds the {} byte session limit",
                    total,
                    negotiated.max_message_size()
                ),
            ));
        }
        let header = Header {
            length: total as u16,
            message_type: self.message_type(),
        };
        header.pack(write)?;
        self.pack_body(write, negotiated)
    }

    /// Encoded size including the header
    pub fn packed_len(&self, negotiated: &Negotiated) -> usize {
        let mut len = SizeCalcWriter(0);
        if self.pack_body(&mut len, negotiated).is_err() {
            return 0;
        }
        len.0 + HEADER_LEN
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_keepalive_roundtrip() {
        let negotiated = Negotiated::default();
        let mut data: Vec<u8> = vec![];
        Message::KeepAlive.pack(&mut data, &negotiated).unwrap();
        assert_eq!(
            data,
            vec![
                255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 0,
                19, 4,
            ]
        );
        let mut cursor = Cursor::new(data);
        let header = Header::unpack_header(&mut cursor, 4096).unwrap();
        assert_eq!(header.length, 19);
        let message = Message::unpack_message(&mut cursor, header, &negotiated).unwrap();
        assert_eq!(message, Message::KeepAlive);
    }

    #[test]
    fn test_bad_marker_is_1_1() {
        let mut data = vec![0u8; 19];
        data[16] = 0;
        data[17] = 19;
        data[18] = 4;
        let err = Header::unpack_header(&mut Cursor::new(data), 4096).unwrap_err();
        let notif = as_notification(&err).unwrap();
        assert_eq!((notif.code, notif.subcode), (1, 1));
    }

    #[test]
    fn test_oversize_length_is_1_2() {
        let mut data = MARKER.to_vec();
        data.extend_from_slice(&[0x20, 0x00]); // 8192
        data.push(4);
        let err = Header::unpack_header(&mut Cursor::new(data), 4096).unwrap_err();
        let notif = as_notification(&err).unwrap();
        assert_eq!((notif.code, notif.subcode), (1, 2));
    }

    #[test]
    fn test_unknown_type_is_1_3() {
        let mut data = MARKER.to_vec();
        data.extend_from_slice(&[0, 19]);
        data.push(9);
        let err = Header::unpack_header(&mut Cursor::new(data), 4096).unwrap_err();
        let notif = as_notification(&err).unwrap();
        assert_eq!((notif.code, notif.subcode), (1, 3));
        assert_eq!(notif.data, vec![9]);
    }
}
