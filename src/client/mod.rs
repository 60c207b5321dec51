//! Client-side counterparts of the relay.
//!
//! - [`reconnect`]: transport-independent reconnection state machine.
//! - `subscriber` (feature `subscriber`): WebSocket subscriber driving it.
//! - `publisher` (feature `publisher`): HTTP notifier for backends.

pub mod reconnect;

#[cfg(feature = "subscriber")]
pub mod subscriber;

#[cfg(feature = "publisher")]
pub mod publisher;

pub use reconnect::{
    Action, BackoffPolicy, CloseKind, LinkState, LinkStatus, ReconnectController, RetryToken,
};

#[cfg(feature = "subscriber")]
pub use subscriber::{Notification, Subscriber, SubscriberHandle};

#[cfg(feature = "publisher")]
pub use publisher::{DEFAULT_RELAY_ENDPOINT, Notifier};
