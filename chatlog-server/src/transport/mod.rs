//! Chat network collaborator.
//!
//! The transport produces [`ChatEvent`]s on a bounded channel and signals a
//! disconnect by cancelling the shared shutdown token.

use chrono::{DateTime, Utc};
use shared::models::{ChatMessage, bare_channel};
use tokio::sync::mpsc;

pub mod discovery;
pub mod irc;

pub use discovery::{DiscoveryError, StreamDirectory, merge_channels};
pub use irc::{IrcClient, TransportError};

/// One chat line as observed by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub user: String,
    pub channel: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatEvent {
    pub fn new(
        user: impl Into<String>,
        channel: impl AsRef<str>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user: user.into(),
            channel: bare_channel(channel.as_ref()).to_string(),
            text: text.into(),
            timestamp,
        }
    }

    #[must_use]
    pub fn into_message(self) -> ChatMessage {
        ChatMessage::new(self.channel, self.user, self.text, self.timestamp)
    }
}

impl From<ChatEvent> for ChatMessage {
    fn from(event: ChatEvent) -> Self {
        event.into_message()
    }
}

pub type EventSender = mpsc::Sender<ChatEvent>;
pub type EventReceiver = mpsc::Receiver<ChatEvent>;

/// The event channel between transport and coordinator. Producers wait
/// when `capacity` events are queued.
#[must_use]
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity.max(1))
}
