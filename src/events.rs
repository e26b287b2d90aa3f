//! Events emitted by the player.
//!
//! Events are sent fire-and-forget over an unbounded channel, typically to a
//! dashboard. They only carry public-safe track fields: no stream URLs.
//!
//! Playback events:
//! * [`QueueChanged`](Event::QueueChanged) - a track started or the queue ran out
//! * [`Play`](Event::Play) - playback resumed
//! * [`Pause`](Event::Pause) - playback paused
//!
//! Connection events:
//! * [`Connected`](Event::Connected) - joined a voice channel
//! * [`Disconnected`](Event::Disconnected) - left a voice channel

use serde::Serialize;

use crate::{track::TrackSummary, voice::ChannelId};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    QueueChanged {
        channel: ChannelId,
        current: Option<TrackSummary>,
        queue: Vec<TrackSummary>,
    },

    Play { channel: ChannelId },

    Pause { channel: ChannelId },

    Connected { channel: ChannelId },

    Disconnected { channel: ChannelId },
}

impl Event {
    #[must_use]
    pub fn channel(&self) -> ChannelId {
        match self {
            Self::QueueChanged { channel, .. }
            | Self::Play { channel }
            | Self::Pause { channel }
            | Self::Connected { channel }
            | Self::Disconnected { channel } => *channel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_tagged() {
        let event = Event::Pause {
            channel: ChannelId(7),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, serde_json::json!({"event": "pause", "channel": 7}));
        assert_eq!(event.channel(), ChannelId(7));
    }
}
