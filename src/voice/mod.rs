//! Voice connection abstraction.
//!
//! The player does not talk to a voice gateway itself. A [`Provider`] joins
//! voice channels and hands out [`Connection`]s; a connection creates the
//! [`Renderer`] that plays streams into the channel.
//!
//! Asynchronous callbacks of the voice stack (stream ended, stream failed,
//! connection lost) are delivered as [`Signal`] messages over the channel
//! passed to [`Provider::connect`]. Stream signals carry the [`Ticket`] of
//! the rendering they refer to, so signals of a superseded rendering can be
//! told apart.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::{error::Result, queue::Volume, track::StreamHandle};

pub mod loopback;

pub use loopback::Loopback;

/// Identifier of a voice channel, or of the guild owning it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies one rendering on a channel.
pub type Ticket = u64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signal {
    pub channel: ChannelId,
    pub kind: SignalKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignalKind {
    /// The stream rendered with `ticket` played to its end.
    StreamIdle { ticket: Ticket },

    /// The stream rendered with `ticket` broke off.
    StreamError { ticket: Ticket, reason: String },

    /// The voice connection went away.
    ConnectionLost,
}

/// Software gain shared between the player and a renderer.
///
/// Stores the ratio as the bits of an `f64` so it can be changed while a
/// stream is rendering.
#[derive(Clone, Debug)]
pub struct VolumeControl(Arc<AtomicU64>);

impl VolumeControl {
    #[must_use]
    pub fn new(volume: Volume) -> Self {
        Self(Arc::new(AtomicU64::new(volume.ratio().to_bits())))
    }

    pub fn set(&self, volume: Volume) {
        self.0.store(volume.ratio().to_bits(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn ratio(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Everything a renderer needs to play one track.
#[derive(Clone, Debug)]
pub struct Playable {
    pub handle: StreamHandle,
    pub title: String,
    pub duration: Option<Duration>,
    pub volume: VolumeControl,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Joins `channel`. Signals of the connection are sent to `signals`.
    async fn connect(
        &self,
        channel: ChannelId,
        signals: UnboundedSender<Signal>,
    ) -> Result<Box<dyn Connection>>;
}

pub trait Connection: Send + Sync {
    /// Whether the connection is still usable.
    fn is_alive(&self) -> bool;

    fn create_renderer(&self) -> Result<Box<dyn Renderer>>;

    /// Leaves the channel. Must not signal `ConnectionLost`.
    fn disconnect(&self);
}

pub trait Renderer: Send + Sync {
    /// Starts rendering, replacing whatever was rendering before.
    fn play(&mut self, playable: Playable, ticket: Ticket) -> Result<()>;

    fn pause(&mut self) -> bool;

    fn resume(&mut self) -> bool;

    /// Stops rendering. Must not signal `StreamIdle` for the stopped stream.
    fn stop(&mut self);
}
