//! Boundary between chat transports and the player.
//!
//! A transport (chat gateway, console, test harness) implements
//! [`CommandContext`] and calls the [`Player`](crate::player::Player)
//! commands with it. Every command answers with a [`Reply`] to display or a
//! [`Rejection`] explaining to the user why nothing happened.

use std::fmt;

use thiserror::Error;

use crate::voice::ChannelId;

/// Where a command came from.
pub trait CommandContext: Send + Sync {
    /// Voice channel of the requesting user, if they are in one.
    fn channel(&self) -> Option<ChannelId>;

    /// Display name of the requesting user.
    fn requester(&self) -> &str;

    /// Text channel to send notifications to.
    fn output(&self) -> Option<String> {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Displayable answer to a command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reply {
    pub title: String,
    pub description: Option<String>,
    pub fields: Vec<Field>,
    pub thumbnail: Option<String>,
}

impl Reply {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(Field {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    #[must_use]
    pub fn thumbnail(mut self, thumbnail: Option<String>) -> Self {
        self.thumbnail = thumbnail;
        self
    }

    /// Value of the first field named `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.value.as_str())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.title)?;
        if let Some(description) = &self.description {
            write!(f, "\n{description}")?;
        }
        for field in &self.fields {
            write!(f, "\n{}: {}", field.name, field.value)?;
        }
        Ok(())
    }
}

/// Why a command did nothing.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("no results found")]
    NotFound,

    #[error("join a voice channel first")]
    NotInVoice,

    #[error("nothing is playing")]
    NothingPlaying,

    #[error("nothing is paused")]
    NothingPaused,

    #[error("the queue is empty")]
    EmptyQueue,

    #[error("position {position} is not in the queue of {len}")]
    InvalidPosition { position: usize, len: usize },

    #[error("volume must be a number between 0 and 100")]
    InvalidVolume,

    #[error("tell me what to play")]
    MissingQuery,

    #[error("could not join the voice channel")]
    ConnectionFailed,

    #[error("playback was stopped")]
    Stopped,
}

pub type Outcome = std::result::Result<Reply, Rejection>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_display() {
        let reply = Reply::new("Queue")
            .description("1. Song")
            .field("Volume", "50%", true);
        assert_eq!(reply.to_string(), "Queue\n1. Song\nVolume: 50%");
        assert_eq!(reply.get("Volume"), Some("50%"));
        assert_eq!(reply.get("Loop"), None);
    }

    #[test]
    fn rejection_messages() {
        let rejection = Rejection::InvalidPosition { position: 4, len: 2 };
        assert_eq!(rejection.to_string(), "position 4 is not in the queue of 2");
    }
}
