mod codec;
mod hold_timer;
mod manager;
mod message_counts;
mod poller;
mod session;

use std::convert::From;
use std::error;
use std::fmt;
use std::io;

pub use codec::{MessageCodec, MessageProtocol};
pub use hold_timer::HoldTimer;
pub use manager::{PeerEvent, SessionManager};
pub use message_counts::MessageCounts;
pub use poller::{Poller, PollerTx};
pub use session::{Session, SessionEvent};

use crate::wire::{as_notification, Notification};

/// Per-peer finite state machine states (RFC 4271, with an explicit
/// Closing for deferred socket shutdown)
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Idle,
    Connect,
    Active,
    OpenSent,
    OpenConfirm,
    Established,
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let word = match self {
            SessionState::Idle => "Idle",
            SessionState::Connect => "Connect",
            SessionState::Active => "Active",
            SessionState::OpenSent => "OpenSent",
            SessionState::OpenConfirm => "OpenConfirm",
            SessionState::Established => "Established",
            SessionState::Closing => "Closing",
        };
        write!(f, "{}", word)
    }
}

#[derive(Debug)]
pub enum SessionError {
    /// Peer de-configured
    Deconfigured,
    /// Received an unexpected ASN. [received, expected]
    OpenAsnMismatch(u32, u32),
    /// Finite State Machine error, unexpected message for the state
    FiniteStateMachine(u8),
    /// Hold time expired. [interval]
    HoldTimeExpired(u16),
    /// A protocol error already mapped to its NOTIFICATION
    Protocol(Notification),
    /// The peer sent us a NOTIFICATION; no reply goes out
    PeerNotification(Notification),
    /// Something happened in transport. [reason]
    TransportError(String),
    /// Some other issue happened. [reason]
    Other(String),
}

impl SessionError {
    /// The NOTIFICATION this error sends before teardown, if any
    pub fn to_notification(&self) -> Option<Notification> {
        use SessionError::*;
        match self {
            Deconfigured => Some(Notification::new(6, 3)),
            OpenAsnMismatch(_, _) => Some(Notification::new(2, 2)),
            FiniteStateMachine(_) => Some(Notification::new(5, 0)),
            HoldTimeExpired(_) => Some(Notification::new(4, 0)),
            Protocol(notification) => Some(notification.clone()),
            PeerNotification(_) => None,
            TransportError(_) => None,
            Other(_) => Some(Notification::new(6, 0)),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Session Error: ")?;
        use SessionError::*;
        match self {
            Deconfigured => write!(f, "Peer de-configured")?,
            OpenAsnMismatch(r, e) => {
                write!(f, "Open ASN mismatch (received={}, expected={})", r, e)?;
            }
            HoldTimeExpired(h) => write!(f, "Hold time expired after {} seconds", h)?,
            FiniteStateMachine(minor) => write!(f, "Finite state machine err [{}]", minor)?,
            Protocol(notification) => write!(f, "Protocol error {}", notification)?,
            PeerNotification(notification) => {
                write!(f, "Peer sent NOTIFICATION {}", notification)?;
            }
            TransportError(r) => write!(f, "Transport error [{}]", r)?,
            Other(r) => write!(f, "{}", r)?,
        }
        Ok(())
    }
}

impl From<io::Error> for SessionError {
    fn from(error: io::Error) -> Self {
        // Decode failures carry their NOTIFICATION mapping; everything
        // else is transport
        match as_notification(&error) {
            Some(notif) => SessionError::Protocol(Notification::from(notif)),
            None => SessionError::TransportError(error.to_string()),
        }
    }
}

impl error::Error for SessionError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::NotificationError;

    #[test]
    fn test_decode_error_maps_to_notification() {
        let io_err: io::Error = NotificationError::update(1, "duplicate attribute").into();
        let err = SessionError::from(io_err);
        let notification = err.to_notification().unwrap();
        assert_eq!((notification.code, notification.subcode), (3, 1));
    }

    #[test]
    fn test_transport_error_sends_nothing() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let err = SessionError::from(io_err);
        assert!(err.to_notification().is_none());
    }

    #[test]
    fn test_hold_time_expiry_is_4_0() {
        let notification = SessionError::HoldTimeExpired(30).to_notification().unwrap();
        assert_eq!((notification.code, notification.subcode), (4, 0));
    }
}
