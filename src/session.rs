//! Playback session of one channel.
//!
//! The lifecycle is an explicit transition table: [`transition`] maps the
//! current [`Status`] and an [`Input`] onto the next status and the
//! [`Effect`]s the player has to carry out. The table is pure, so every
//! path through it can be tested without a voice connection or a backend.
//!
//! ```text
//! Idle --Connect--> Connecting --Connected--> Idle [Advance]
//!   Advanced(track) --> Buffering [Acquire] --Rendering--> Playing [Publish]
//!   Playing <--Pause/Resume--> Paused
//!   StreamEnded / StreamFailed --> [ScheduleAdvance]
//!   Stop / ConnectionLost --> Idle [Teardown]
//! ```
//!
//! [`Session`] binds a connection and its renderer once connected.

use std::fmt;

use crate::{
    error::{ErrorKind, Result},
    queue::Volume,
    track::{StreamHandle, Track},
    voice::{ChannelId, Connection, Playable, Renderer, Ticket, VolumeControl},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Status {
    #[default]
    Idle,
    Connecting,
    Playing,
    Paused,
    /// Stream acquisition in flight.
    Buffering,
    /// The current track broke; always followed by an advance.
    Error,
}

impl Status {
    /// Whether a current track is expected in this status.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Playing | Self::Paused | Self::Buffering)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Buffering => "buffering",
            Self::Error => "error",
        };
        f.write_str(status)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Input {
    Connect,
    Connected,
    ConnectFailed,
    /// The queue advanced; `track` tells whether there is a current track.
    Advanced { track: bool },
    Rendering,
    AcquireFailed,
    Pause,
    Resume,
    Skip,
    Stop,
    StreamEnded,
    StreamFailed,
    ConnectionLost,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Effect {
    /// Advance the queue now.
    Advance,
    /// Advance the queue past the current track, ignoring repeat-track.
    SkipAhead,
    /// Advance the queue after the debounce.
    ScheduleAdvance,
    /// Acquire a stream for the current track and render it.
    Acquire,
    PauseRenderer,
    ResumeRenderer,
    StopRenderer,
    /// Publish the queue to observers.
    Publish,
    /// Release session and queue of the channel.
    Teardown,
}

/// Returns the next status and the effects to carry out, or `None` if
/// `input` is not accepted in `status`.
#[must_use]
#[expect(clippy::enum_glob_use)]
pub fn transition(status: Status, input: Input) -> Option<(Status, Vec<Effect>)> {
    use Effect::*;
    use Status::*;

    let next = match (status, input) {
        (Idle, Input::Connect) => (Connecting, vec![]),
        (Connecting, Input::Connected) => (Idle, vec![Advance]),
        (Connecting, Input::ConnectFailed) => (Idle, vec![Teardown]),

        (_, Input::Advanced { track: true }) => (Buffering, vec![Acquire]),
        (_, Input::Advanced { track: false }) => (Idle, vec![Publish]),

        (Buffering, Input::Rendering) => (Playing, vec![Publish]),
        (Buffering, Input::AcquireFailed) => (Error, vec![Advance]),

        (Playing | Buffering, Input::Pause) => (Paused, vec![PauseRenderer]),
        (Paused, Input::Resume) => (Playing, vec![ResumeRenderer]),

        (Playing | Paused | Buffering, Input::Skip) => (status, vec![StopRenderer, SkipAhead]),

        (Playing | Paused, Input::StreamEnded) => (status, vec![ScheduleAdvance]),
        (Playing | Paused | Buffering, Input::StreamFailed) => (Error, vec![ScheduleAdvance]),

        (_, Input::Stop) => (Idle, vec![StopRenderer, Teardown]),
        (_, Input::ConnectionLost) => (Idle, vec![Teardown]),

        _ => return None,
    };

    Some(next)
}

/// Why a stream could not be acquired or rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Failure {
    /// The data could not be decoded.
    Decode,
    /// The backend refused to serve more requests for now.
    Throttled,
    /// Anything else: gone, blocked, unreachable.
    Unavailable,
}

impl From<ErrorKind> for Failure {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::DataLoss | ErrorKind::InvalidArgument => Self::Decode,
            ErrorKind::ResourceExhausted => Self::Throttled,
            _ => Self::Unavailable,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failure = match self {
            Self::Decode => "decode failure",
            Self::Throttled => "throttled",
            Self::Unavailable => "unavailable",
        };
        f.write_str(failure)
    }
}

/// A live connection and renderer in one channel.
pub struct Session {
    channel: ChannelId,
    connection: Box<dyn Connection>,
    renderer: Box<dyn Renderer>,
    volume: Option<VolumeControl>,
}

impl Session {
    /// # Errors
    ///
    /// Returns an error if the connection cannot create a renderer.
    pub fn open(channel: ChannelId, connection: Box<dyn Connection>) -> Result<Self> {
        let renderer = connection.create_renderer()?;
        Ok(Self {
            channel,
            connection,
            renderer,
            volume: None,
        })
    }

    #[must_use]
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.connection.is_alive()
    }

    /// Starts rendering `track` from `handle` at `volume`.
    ///
    /// # Errors
    ///
    /// Returns the renderer's error.
    pub fn render(
        &mut self,
        track: &Track,
        handle: StreamHandle,
        volume: Volume,
        ticket: Ticket,
    ) -> Result<()> {
        let control = VolumeControl::new(volume);
        let playable = Playable {
            handle,
            title: track.title().to_owned(),
            duration: track.duration(),
            volume: control.clone(),
        };

        self.renderer.play(playable, ticket)?;
        self.volume = Some(control);
        Ok(())
    }

    pub fn pause(&mut self) -> bool {
        self.renderer.pause()
    }

    pub fn resume(&mut self) -> bool {
        self.renderer.resume()
    }

    pub fn stop(&mut self) {
        self.renderer.stop();
        self.volume = None;
    }

    /// Changes the volume of the rendering stream, if any.
    pub fn set_volume(&self, volume: Volume) {
        if let Some(control) = &self.volume {
            control.set(volume);
        }
    }

    /// Stops rendering and leaves the channel.
    pub fn close(mut self) {
        self.stop();
        self.connection.disconnect();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("channel", &self.channel)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}
