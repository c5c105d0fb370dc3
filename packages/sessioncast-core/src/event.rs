//! Internal event set published on the [`crate::bus::EventBus`].

use crate::frame::ScreenFrame;

/// Why a `Disconnected` event was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Normal,
    ConnectionLost,
    AuthFailed,
    CircuitBreaker,
    ServerError,
}

/// A tagged event, timestamped at publish time.
///
/// This is a closed union: dispatch sites match exhaustively rather than
/// treating it as open for extension.
#[derive(Debug, Clone)]
pub enum Event {
    Connected {
        timestamp: u64,
    },
    Disconnected {
        reason: DisconnectReason,
        detail: String,
        timestamp: u64,
    },
    Screen {
        session: String,
        frame: ScreenFrame,
        timestamp: u64,
    },
    KeysReceived {
        session: String,
        keys: String,
        press_enter: bool,
        timestamp: u64,
    },
    SessionCreated {
        session: String,
        timestamp: u64,
    },
    SessionKilled {
        session: String,
        timestamp: u64,
    },
    ResizeRequest {
        session: String,
        cols: u32,
        rows: u32,
        timestamp: u64,
    },
    Error {
        code: String,
        message: String,
        timestamp: u64,
    },
}

/// The discriminant of an [`Event`], used as the event-bus dispatch key.
///
/// Kept separate from `Event` itself (rather than deriving from a `Display`
/// impl on the payload) so `subscribe` can be called before any event of that
/// kind has ever been constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Screen,
    KeysReceived,
    SessionCreated,
    SessionKilled,
    ResizeRequest,
    Error,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connected { .. } => EventKind::Connected,
            Event::Disconnected { .. } => EventKind::Disconnected,
            Event::Screen { .. } => EventKind::Screen,
            Event::KeysReceived { .. } => EventKind::KeysReceived,
            Event::SessionCreated { .. } => EventKind::SessionCreated,
            Event::SessionKilled { .. } => EventKind::SessionKilled,
            Event::ResizeRequest { .. } => EventKind::ResizeRequest,
            Event::Error { .. } => EventKind::Error,
        }
    }
}
