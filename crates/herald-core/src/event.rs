//! Inbound event model for the Herald framework.
//!
//! The transport collaborator (gateway socket, webhook server) delivers
//! [`Event`]s to the dispatcher. The core only requires what dispatch needs:
//! text content for message events, and an invoked command name plus a way to
//! respond for interaction events. Everything else the platform sends travels
//! through untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A user or bot account on the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Snowflake ID of the account.
    pub id: u64,
    /// Display name.
    pub username: String,
    /// Whether the account is a bot or webhook rather than a human.
    #[serde(default)]
    pub is_bot: bool,
}

/// A message-creation event delivered by the transport collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Snowflake ID of the message.
    pub id: u64,
    /// Channel the message was sent in.
    pub channel_id: u64,
    /// Guild the message was sent in, or `None` for a direct message.
    pub guild_id: Option<u64>,
    /// The message author.
    pub author: User,
    /// Raw text content. Absent for embed-only or attachment-only messages.
    pub content: Option<String>,
}

impl MessageEvent {
    /// Whether this message was sent in a direct-message channel.
    pub fn is_dm(&self) -> bool {
        self.guild_id.is_none()
    }

    /// Whether the author is a human user rather than a bot or webhook.
    pub fn is_human(&self) -> bool {
        !self.author.is_bot
    }
}

/// A single named option value supplied with a slash-command invocation.
///
/// Option values are kept as raw JSON; type-specific conversion is the
/// argument converters' job, outside this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOption {
    pub name: String,
    pub value: Value,
}

/// A slash-command interaction, received either as a gateway event or as a
/// direct HTTP request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    /// Snowflake ID of the interaction.
    pub id: u64,
    /// Continuation token used for responding over REST.
    pub token: String,
    /// Channel the interaction was invoked in.
    pub channel_id: u64,
    /// Guild the interaction was invoked in, if any.
    pub guild_id: Option<u64>,
    /// The invoking user.
    pub author: User,
    /// Name of the invoked command.
    pub command_name: String,
    /// Option values supplied with the invocation.
    #[serde(default)]
    pub options: Vec<CommandOption>,
}

/// The event categories a listener can subscribe to on an [`EventSource`].
///
/// [`EventSource`]: crate::gateway::EventSource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A message created in a direct-message channel.
    DmMessageCreate,
    /// A message created in a guild channel.
    GuildMessageCreate,
    /// A slash-command interaction created.
    InteractionCreate,
    /// The event source is starting up.
    SourceStarting,
    /// The event source is shutting down.
    SourceClosing,
}

/// A type-erased inbound event.
#[derive(Debug, Clone)]
pub enum Event {
    Message(MessageEvent),
    Interaction(InteractionEvent),
    SourceStarting,
    SourceClosing,
}

impl Event {
    /// The subscription category this event is delivered under.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Message(event) if event.is_dm() => EventKind::DmMessageCreate,
            Event::Message(_) => EventKind::GuildMessageCreate,
            Event::Interaction(_) => EventKind::InteractionCreate,
            Event::SourceStarting => EventKind::SourceStarting,
            Event::SourceClosing => EventKind::SourceClosing,
        }
    }

    /// A short stable name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Message(_) => "message_create",
            Event::Interaction(_) => "interaction_create",
            Event::SourceStarting => "source_starting",
            Event::SourceClosing => "source_closing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: u64) -> User {
        User {
            id,
            username: "tester".into(),
            is_bot: false,
        }
    }

    #[test]
    fn message_event_kind_tracks_guild() {
        let dm = Event::Message(MessageEvent {
            id: 1,
            channel_id: 2,
            guild_id: None,
            author: user(3),
            content: Some("hi".into()),
        });
        assert_eq!(dm.kind(), EventKind::DmMessageCreate);

        let guild = Event::Message(MessageEvent {
            id: 1,
            channel_id: 2,
            guild_id: Some(9),
            author: user(3),
            content: Some("hi".into()),
        });
        assert_eq!(guild.kind(), EventKind::GuildMessageCreate);
    }

    #[test]
    fn is_human_rejects_bots() {
        let mut event = MessageEvent {
            id: 1,
            channel_id: 2,
            guild_id: None,
            author: user(3),
            content: None,
        };
        assert!(event.is_human());
        event.author.is_bot = true;
        assert!(!event.is_human());
    }
}
