use std::error::Error as StdError;
use std::fmt;
use std::io::{Error, ErrorKind};

/// A decode failure that maps onto a BGP NOTIFICATION (code, subcode).
///
/// Decoders return this wrapped in an `io::Error`; the session layer
/// downcasts at the FSM boundary and sends the NOTIFICATION. The decoder
/// itself never talks to the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationError {
    pub code: u8,
    pub subcode: u8,
    pub data: Vec<u8>,
    pub reason: String,
}

impl NotificationError {
    pub fn new(code: u8, subcode: u8, reason: impl Into<String>) -> Self {
        Self {
            code,
            subcode,
            data: vec![],
            reason: reason.into(),
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Message Header Error (1, subcode)
    pub fn header(subcode: u8, reason: impl Into<String>) -> Self {
        Self::new(1, subcode, reason)
    }

    /// OPEN Message Error (2, subcode)
    pub fn open(subcode: u8, reason: impl Into<String>) -> Self {
        Self::new(2, subcode, reason)
    }

    /// UPDATE Message Error (3, subcode)
    pub fn update(subcode: u8, reason: impl Into<String>) -> Self {
        Self::new(3, subcode, reason)
    }

    /// UPDATE Malformed Attribute List (3, 1)
    pub fn malformed_attribute_list(reason: impl Into<String>) -> Self {
        Self::update(1, reason)
    }

    /// UPDATE Attribute Length Error (3, 5)
    pub fn attribute_length(reason: impl Into<String>) -> Self {
        Self::update(5, reason)
    }

    /// OPEN Unsupported Capability (2, 7)
    pub fn unsupported_capability(reason: impl Into<String>) -> Self {
        Self::open(7, reason)
    }
}

impl fmt::Display for NotificationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {}) {}", self.code, self.subcode, self.reason)
    }
}

impl StdError for NotificationError {}

impl From<NotificationError> for Error {
    fn from(err: NotificationError) -> Error {
        Error::new(ErrorKind::InvalidData, err)
    }
}

/// Recover the NOTIFICATION mapping from an `io::Error`, if the failure
/// originated in a decoder. Transport errors return None.
pub fn as_notification(err: &Error) -> Option<&NotificationError> {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<NotificationError>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_through_io_error() {
        let err: Error = NotificationError::update(5, "bad nexthop length").into();
        let notif = as_notification(&err).expect("Downcast to NotificationError");
        assert_eq!((notif.code, notif.subcode), (3, 5));
    }

    #[test]
    fn test_transport_error_is_not_a_notification() {
        let err = Error::new(ErrorKind::ConnectionReset, "peer reset");
        assert!(as_notification(&err).is_none());
    }
}
