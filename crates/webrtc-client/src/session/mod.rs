//! Room session: owns the relay channel, the peer link and the negotiation
//! engine, and turns their events into UI notifications.

pub mod coordinator;
pub mod observer;

pub use coordinator::{
    Collaborators, Session, SessionCommand, SessionEvent, SessionHandle, SessionState,
};
pub use observer::{LoggingObserver, SessionObserver};
