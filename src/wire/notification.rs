use std::fmt;
use std::io::{Error, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

use super::error::NotificationError;

/// Cease subcodes carrying a shutdown communication (RFC 9003)
const CEASE: u8 = 6;
const CEASE_SHUTDOWN: u8 = 2;
const CEASE_RESET: u8 = 4;

/// The legacy (RFC 8203) shutdown communication bound; we refuse to emit
/// more even though inbound messages may carry up to 255 bytes
pub const SHUTDOWN_COMMUNICATION_MAX: usize = 128;

/// A BGP NOTIFICATION message; sending one ends the session
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Notification {
    pub code: u8,
    pub subcode: u8,
    pub data: Vec<u8>,
}

impl Notification {
    pub fn new(code: u8, subcode: u8) -> Self {
        Self {
            code,
            subcode,
            data: vec![],
        }
    }

    /// Cease with a shutdown communication, truncated to the legacy limit
    /// on a character boundary
    pub fn cease_shutdown(subcode: u8, message: &str) -> Self {
        let mut text = message;
        while text.len() > SHUTDOWN_COMMUNICATION_MAX {
            let mut cut = text.len() - 1;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text = &text[..cut];
        }
        let mut data = Vec::with_capacity(1 + text.len());
        data.push(text.len() as u8);
        data.extend_from_slice(text.as_bytes());
        Self {
            code: CEASE,
            subcode,
            data,
        }
    }

    pub fn unpack_notification(stream: &mut impl Read, length: usize) -> Result<Self, Error> {
        let code = stream.read_u8()?;
        let subcode = stream.read_u8()?;
        let mut data = vec![0u8; length.saturating_sub(2)];
        stream.read_exact(&mut data)?;
        Ok(Self {
            code,
            subcode,
            data,
        })
    }

    pub fn pack(&self, write: &mut impl Write) -> Result<(), Error> {
        write.write_u8(self.code)?;
        write.write_u8(self.subcode)?;
        write.write_all(&self.data)
    }

    /// The UTF-8 shutdown communication, when this is a cease that
    /// carries one
    pub fn shutdown_communication(&self) -> Option<String> {
        if self.code != CEASE
            || !(self.subcode == CEASE_SHUTDOWN || self.subcode == CEASE_RESET)
            || self.data.is_empty()
        {
            return None;
        }
        let declared = usize::from(self.data[0]);
        let text = self.data.get(1..1 + declared)?;
        String::from_utf8(text.to_vec()).ok()
    }
}

impl From<&NotificationError> for Notification {
    fn from(err: &NotificationError) -> Self {
        Self {
            code: err.code,
            subcode: err.subcode,
            data: err.data.clone(),
        }
    }
}

fn code_name(code: u8) -> &'static str {
    match code {
        1 => "Message Header Error",
        2 => "OPEN Message Error",
        3 => "UPDATE Message Error",
        4 => "Hold Timer Expired",
        5 => "Finite State Machine Error",
        6 => "Cease",
        7 => "ROUTE-REFRESH Message Error",
        _ => "Unknown",
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({}, {})", code_name(self.code), self.code, self.subcode)?;
        if let Some(message) = self.shutdown_communication() {
            write!(f, " \"{}\"", message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_roundtrip() {
        let notification = Notification::new(6, 3);
        let mut data: Vec<u8> = vec![];
        notification.pack(&mut data).unwrap();
        assert_eq!(data, vec![6, 3]);
        let decoded = Notification::unpack_notification(&mut Cursor::new(data), 2).unwrap();
        assert_eq!(decoded, notification);
    }

    #[test]
    fn test_shutdown_communication() {
        let notification = Notification::cease_shutdown(2, "bye");
        assert_eq!(notification.data, vec![3, b'b', b'y', b'e']);
        assert_eq!(notification.shutdown_communication().unwrap(), "bye");
        assert_eq!(notification.to_string(), "Cease (6, 2) \"bye\"");
    }

    #[test]
    fn test_shutdown_communication_truncates_at_limit() {
        let long = "x".repeat(200);
        let notification = Notification::cease_shutdown(2, &long);
        assert_eq!(notification.data[0] as usize, SHUTDOWN_COMMUNICATION_MAX);
        assert_eq!(notification.data.len(), 1 + SHUTDOWN_COMMUNICATION_MAX);
    }

    #[test]
    fn test_inbound_long_communication_accepted() {
        // RFC 9003 allows up to 255 inbound
        let text = "y".repeat(200);
        let mut data = vec![200u8];
        data.extend_from_slice(text.as_bytes());
        let notification = Notification {
            code: 6,
            subcode: 2,
            data,
        };
        assert_eq!(notification.shutdown_communication().unwrap(), text);
    }
}
