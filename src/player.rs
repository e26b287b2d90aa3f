//! Per-channel playback orchestration.
//!
//! The [`Player`] owns one [`Channel`] per voice channel in use. Each channel
//! holds its queue, session status and voice session behind an async mutex,
//! so every command and every signal on a channel runs to completion before
//! the next one starts, while channels proceed independently.
//!
//! State changes go through [`session::transition`]. The player feeds it
//! inputs (from commands, voice signals and its own effects) and carries out
//! the effects it returns until nothing is left to do.
//!
//! Three counters guard against stale work:
//! * the *ticket* identifies the rendering in flight; renderer signals and
//!   debounced advances carrying another ticket are ignored. Tickets are
//!   unique across the player, so a signal from a released channel never
//!   matches a rendering of the channel that replaced it;
//! * the *generation* is bumped by `stop`, connection loss and the
//!   supervisor before they take the lock; a stream acquired under an older
//!   generation is dropped;
//! * the *stop count* is bumped by explicit stops only; a `play` that saw
//!   it change while resolving gives up.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use futures_util::future::BoxFuture;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::Instant,
};
use uuid::Uuid;

use crate::{
    command::{CommandContext, Outcome, Rejection, Reply},
    config::Config,
    error::{Error, Result},
    events::Event,
    preload,
    queue::{Queue, Volume},
    resolver::Resolver,
    session::{self, Effect, Failure, Input, Session, Status},
    track::{format_duration, Track},
    voice::{ChannelId, Provider, Signal, SignalKind, Ticket},
};

/// Upcoming songs listed by [`Player::show_queue`].
const QUEUE_PAGE: usize = 10;

/// Mutable state of one channel, guarded by [`Channel::state`].
#[derive(Debug)]
pub(crate) struct ChannelState {
    pub(crate) queue: Queue,
    pub(crate) status: Status,
    pub(crate) session: Option<Session>,

    /// Set once the channel is torn down. A released state is never used
    /// again: the next `play` creates a new channel.
    pub(crate) released: bool,

    pub(crate) ticket: Ticket,
    pub(crate) idle_since: Option<Instant>,
}

impl ChannelState {
    /// Nothing playing and nothing queued.
    pub(crate) fn is_idle(&self) -> bool {
        self.status == Status::Idle && self.queue.is_empty()
    }

    /// Has a session whose connection went away.
    pub(crate) fn is_dead(&self) -> bool {
        self.session.as_ref().is_some_and(|session| !session.is_alive())
    }
}

#[derive(Debug)]
pub(crate) struct Channel {
    pub(crate) id: ChannelId,
    generation: AtomicU64,
    stops: AtomicU64,
    pub(crate) state: Arc<tokio::sync::Mutex<ChannelState>>,
}

impl Channel {
    fn new(id: ChannelId, queue: Queue) -> Self {
        Self {
            id,
            generation: AtomicU64::new(0),
            stops: AtomicU64::new(0),
            state: Arc::new(tokio::sync::Mutex::new(ChannelState {
                queue,
                status: Status::Idle,
                session: None,
                released: false,
                ticket: 0,
                idle_since: None,
            })),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn stops(&self) -> u64 {
        self.stops.load(Ordering::SeqCst)
    }

    /// An explicit stop: cancels in-flight work and pending `play`s.
    fn stop_requested(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.bump();
    }
}

#[derive(Clone, Copy, Debug)]
enum Step {
    Input(Input),
    Effect(Effect),
}

struct Shared {
    config: Config,
    resolver: Arc<Resolver>,
    provider: Arc<dyn Provider>,
    events: Option<UnboundedSender<Event>>,
    signals: UnboundedSender<Signal>,
    tickets: AtomicU64,
    channels: Mutex<HashMap<ChannelId, Arc<Channel>>>,
}

/// Handle to the playback orchestrator. Cloning is cheap.
#[derive(Clone)]
pub struct Player(Arc<Shared>);

impl Player {
    /// Creates a player. The returned receiver gets the signals of every
    /// voice connection the player makes; pass it to [`Player::run`].
    #[must_use]
    pub fn new(
        config: Config,
        resolver: Arc<Resolver>,
        provider: Arc<dyn Provider>,
        events: Option<UnboundedSender<Event>>,
    ) -> (Self, UnboundedReceiver<Signal>) {
        let (signals, receiver) = mpsc::unbounded_channel();
        let shared = Shared {
            config,
            resolver,
            provider,
            events,
            signals,
            tickets: AtomicU64::new(0),
            channels: Mutex::new(HashMap::new()),
        };

        (Self(Arc::new(shared)), receiver)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.0.config
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.0.resolver
    }

    fn next_ticket(&self) -> Ticket {
        self.0.tickets.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<ChannelId, Arc<Channel>>> {
        self.0.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn channel(&self, id: ChannelId) -> Option<Arc<Channel>> {
        self.channels().get(&id).cloned()
    }

    fn get_or_create(&self, id: ChannelId) -> Arc<Channel> {
        let mut channels = self.channels();
        let channel = channels.entry(id).or_insert_with(|| {
            debug!("{id}: new channel");
            let volume = Volume::from_ratio(self.0.config.default_volume).unwrap_or_default();
            Arc::new(Channel::new(id, Queue::new(self.0.config.max_history, volume)))
        });
        Arc::clone(channel)
    }

    /// Removes `channel` from the map unless it was replaced already.
    fn forget(&self, channel: &Arc<Channel>) {
        let mut channels = self.channels();
        if channels
            .get(&channel.id)
            .is_some_and(|current| Arc::ptr_eq(current, channel))
        {
            channels.remove(&channel.id);
        }
    }

    pub(crate) fn all_channels(&self) -> Vec<Arc<Channel>> {
        self.channels().values().cloned().collect()
    }

    /// Channels with state, in no particular order.
    #[must_use]
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels().keys().copied().collect()
    }

    #[must_use]
    pub async fn status(&self, id: ChannelId) -> Option<Status> {
        let channel = self.channel(id)?;
        let state = channel.state.lock().await;
        (!state.released).then_some(state.status)
    }

    /// Runs `f` on the queue of `id`, if the channel exists.
    pub async fn with_queue<T>(&self, id: ChannelId, f: impl FnOnce(&Queue) -> T) -> Option<T> {
        let channel = self.channel(id)?;
        let state = channel.state.lock().await;
        (!state.released).then(|| f(&state.queue))
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.0.events {
            if events.send(event).is_err() {
                trace!("event receiver dropped");
            }
        }
    }

    fn publish(&self, channel: &Channel, state: &ChannelState) {
        self.emit(Event::QueueChanged {
            channel: channel.id,
            current: state.queue.current().map(Track::summary),
            queue: state.queue.songs().map(Track::summary).collect(),
        });
    }

    fn spawn_preload(&self, channel: &Arc<Channel>) {
        tokio::spawn(preload::preload(
            Arc::clone(&self.0.resolver),
            Arc::clone(channel),
        ));
    }

    /// Feeds `input` into the state machine of `channel`.
    async fn drive(&self, channel: &Arc<Channel>, state: &mut ChannelState, input: Input) {
        self.step(channel, state, Step::Input(input)).await;
    }

    async fn step(&self, channel: &Arc<Channel>, state: &mut ChannelState, first: Step) {
        let mut work = VecDeque::from([first]);
        while let Some(step) = work.pop_front() {
            match step {
                Step::Input(input) => {
                    let Some((status, effects)) = session::transition(state.status, input) else {
                        trace!("{}: ignoring {input:?} while {}", channel.id, state.status);
                        continue;
                    };

                    if status != state.status {
                        debug!("{}: {} -> {status}", channel.id, state.status);
                        state.status = status;
                    }
                    work.extend(effects.into_iter().map(Step::Effect));
                }

                Step::Effect(effect) => {
                    if let Some(input) = self.apply(channel, state, effect).await {
                        work.push_back(Step::Input(input));
                    }
                }
            }
        }

        if state.is_idle() {
            state.idle_since.get_or_insert_with(Instant::now);
        } else {
            state.idle_since = None;
        }
    }

    async fn apply(
        &self,
        channel: &Arc<Channel>,
        state: &mut ChannelState,
        effect: Effect,
    ) -> Option<Input> {
        match effect {
            Effect::Advance => Some(Input::Advanced {
                track: state.queue.advance().is_some(),
            }),

            Effect::SkipAhead => Some(Input::Advanced {
                track: state.queue.skip().is_some(),
            }),

            Effect::ScheduleAdvance => {
                tokio::spawn(self.deferred_advance(Arc::clone(channel), state.ticket));
                None
            }

            Effect::Acquire => self.acquire(channel, state).await,

            Effect::PauseRenderer => {
                if let Some(session) = state.session.as_mut() {
                    session.pause();
                }
                self.emit(Event::Pause { channel: channel.id });
                None
            }

            Effect::ResumeRenderer => {
                if let Some(session) = state.session.as_mut() {
                    session.resume();
                }
                self.emit(Event::Play { channel: channel.id });
                None
            }

            Effect::StopRenderer => {
                state.ticket = self.next_ticket();
                if let Some(session) = state.session.as_mut() {
                    session.stop();
                }
                None
            }

            Effect::Publish => {
                self.publish(channel, state);
                None
            }

            Effect::Teardown => {
                state.released = true;
                state.ticket = self.next_ticket();
                let dropped = state.queue.clear() + usize::from(state.queue.discard_current().is_some());
                if let Some(session) = state.session.take() {
                    session.close();
                    self.emit(Event::Disconnected { channel: channel.id });
                }
                self.forget(channel);
                info!("{}: released, {dropped} songs dropped", channel.id);
                None
            }
        }
    }

    /// Acquires a stream for the current track and starts rendering it.
    ///
    /// Returns `None` if the channel was stopped in the meantime: the stop is
    /// waiting for the lock and takes over from here.
    async fn acquire(&self, channel: &Arc<Channel>, state: &mut ChannelState) -> Option<Input> {
        let generation = channel.generation();
        let Some(track) = state.queue.current_mut() else {
            return Some(Input::AcquireFailed);
        };

        let result = self.0.resolver.acquire(track).await;
        if channel.generation() != generation {
            debug!("{}: discarding stream acquired before stop", channel.id);
            return None;
        }

        let handle = match result {
            Ok(handle) => handle,
            Err(e) => return Some(drop_broken(channel.id, state, &e)),
        };

        let ticket = self.next_ticket();
        state.ticket = ticket;
        let volume = state.queue.volume();
        let (Some(session), Some(track)) = (state.session.as_mut(), state.queue.current()) else {
            return Some(drop_broken(channel.id, state, &Error::unavailable("no voice session")));
        };

        if let Err(e) = session.render(track, handle, volume, ticket) {
            return Some(drop_broken(channel.id, state, &e));
        }

        info!("{}: playing {track}", channel.id);
        if state.queue.next().is_some_and(|next| !next.is_preloaded()) {
            self.spawn_preload(channel);
        }
        Some(Input::Rendering)
    }

    /// Advances `channel` after the debounce, unless something else moved
    /// it on in the meantime.
    fn deferred_advance(&self, channel: Arc<Channel>, ticket: Ticket) -> BoxFuture<'static, ()> {
        let player = self.clone();
        let generation = channel.generation();
        Box::pin(async move {
            tokio::time::sleep(player.0.config.advance_debounce).await;

            let mut state = channel.state.lock().await;
            if state.released || channel.generation() != generation || state.ticket != ticket {
                trace!("{}: debounced advance superseded", channel.id);
                return;
            }

            if state.status == Status::Error {
                if let Some(track) = state.queue.discard_current() {
                    debug!("{}: dropping broken {track}", channel.id);
                }
            }

            player
                .step(&channel, &mut state, Step::Effect(Effect::Advance))
                .await;
        })
    }

    /// Handles one voice signal.
    pub async fn handle(&self, signal: Signal) {
        let Some(channel) = self.channel(signal.channel) else {
            trace!("{}: signal for unknown channel", signal.channel);
            return;
        };

        let (ticket, input) = match signal.kind {
            SignalKind::StreamIdle { ticket } => (Some(ticket), Input::StreamEnded),
            SignalKind::StreamError { ticket, reason } => {
                warn!("{}: stream failed: {reason}", channel.id);
                (Some(ticket), Input::StreamFailed)
            }
            SignalKind::ConnectionLost => {
                channel.bump();
                (None, Input::ConnectionLost)
            }
        };

        let mut state = channel.state.lock().await;
        if state.released {
            return;
        }
        if ticket.is_some_and(|ticket| ticket != state.ticket) {
            debug!("{}: ignoring signal of superseded stream", channel.id);
            return;
        }

        if input == Input::ConnectionLost {
            warn!("{}: connection lost", channel.id);
        }
        self.drive(&channel, &mut state, input).await;
    }

    /// Handles voice signals until every sender is gone. Channels are
    /// handled concurrently.
    pub async fn run(self, mut signals: UnboundedReceiver<Signal>) {
        while let Some(signal) = signals.recv().await {
            let player = self.clone();
            tokio::spawn(async move { player.handle(signal).await });
        }
    }

    /// Releases `channel` with `input` if `accept` holds under its lock.
    pub(crate) async fn reclaim<F>(&self, channel: &Arc<Channel>, input: Input, accept: F) -> bool
    where
        F: FnOnce(&ChannelState) -> bool,
    {
        let mut state = channel.state.lock().await;
        if state.released || !accept(&*state) {
            return false;
        }

        channel.bump();
        self.drive(channel, &mut state, input).await;
        true
    }

    /// Stops every channel.
    pub async fn shutdown(&self) {
        for channel in self.all_channels() {
            channel.stop_requested();
            let mut state = channel.state.lock().await;
            if !state.released {
                self.drive(&channel, &mut state, Input::Stop).await;
            }
        }
    }

    async fn connect(&self, channel: &Arc<Channel>, state: &mut ChannelState) -> Result<()> {
        self.drive(channel, state, Input::Connect).await;

        let connect = self.0.provider.connect(channel.id, self.0.signals.clone());
        let session = match tokio::time::timeout(self.0.config.backend_timeout, connect).await {
            Ok(connection) => connection.and_then(|connection| Session::open(channel.id, connection)),
            Err(e) => Err(e.into()),
        };

        match session {
            Ok(session) => {
                info!("{}: connected", channel.id);
                state.session = Some(session);
                self.emit(Event::Connected { channel: channel.id });
                self.drive(channel, state, Input::Connected).await;
                Ok(())
            }
            Err(e) => {
                warn!("{}: could not connect: {e}", channel.id);
                self.drive(channel, state, Input::ConnectFailed).await;
                Err(e)
            }
        }
    }

    /// Resolves `query` and queues the result, joining the requester's voice
    /// channel if needed.
    pub async fn play(&self, ctx: &dyn CommandContext, query: &str) -> Outcome {
        let query = query.trim();
        if query.is_empty() {
            return Err(Rejection::MissingQuery);
        }
        let id = ctx.channel().ok_or(Rejection::NotInVoice)?;

        // A stop while resolving cancels this request. A release by the
        // supervisor does not: the loop below starts a new channel.
        let before = self.channel(id).map(|channel| (channel.stops(), channel));

        let track = self
            .0
            .resolver
            .resolve(query, ctx.requester())
            .await
            .ok_or(Rejection::NotFound)?;
        let track_id = track.id();

        if before.is_some_and(|(stops, channel)| channel.stops() != stops) {
            info!("{id}: stopped while resolving \"{query}\"");
            return Err(Rejection::Stopped);
        }

        let (channel, mut state) = loop {
            let channel = self.get_or_create(id);
            let state = Arc::clone(&channel.state).lock_owned().await;
            // Otherwise it was released while we waited and is gone from the
            // map by now.
            if !state.released {
                break (channel, state);
            }
        };
        let (generation, stops) = (channel.generation(), channel.stops());

        if let Some(output) = ctx.output() {
            state.queue.set_output(Some(output));
        }

        let pending = state.queue.len();
        let position = state.queue.enqueue(track);
        debug!("{id}: queued at {position}");

        if state.session.is_none() {
            if self.connect(&channel, &mut state).await.is_err() {
                return Err(Rejection::ConnectionFailed);
            }
        } else if state.status == Status::Idle {
            self.step(&channel, &mut state, Step::Effect(Effect::Advance))
                .await;
        } else {
            self.publish(&channel, &state);
            if pending == 0 && state.status.is_active() {
                self.spawn_preload(&channel);
            }
        }

        if channel.generation() != generation {
            return Err(if channel.stops() == stops {
                Rejection::ConnectionFailed
            } else {
                Rejection::Stopped
            });
        }

        let queue = &state.queue;
        let reply = if let Some(track) = queue.current().filter(|track| track.id() == track_id) {
            now_playing(track, queue)
        } else if let Some((index, track)) = find(queue, track_id) {
            Reply::new("Added to queue")
                .description(describe(track))
                .field("Position", (index + 1).to_string(), true)
                .field("Source", track.label(), true)
                .thumbnail(track.thumbnail().map(ToString::to_string))
        } else {
            Reply::new("Skipped").description("The track could not be streamed.")
        };

        Ok(reply)
    }

    async fn lock_existing(
        &self,
        ctx: &dyn CommandContext,
        rejection: Rejection,
    ) -> std::result::Result<(Arc<Channel>, tokio::sync::OwnedMutexGuard<ChannelState>), Rejection>
    {
        let id = ctx.channel().ok_or(Rejection::NotInVoice)?;
        let channel = self.channel(id).ok_or(rejection.clone())?;
        let state = Arc::clone(&channel.state).lock_owned().await;
        if state.released {
            return Err(rejection);
        }
        Ok((channel, state))
    }

    /// Moves on to the next song right away.
    pub async fn skip(&self, ctx: &dyn CommandContext) -> Outcome {
        let (channel, mut state) = self.lock_existing(ctx, Rejection::NothingPlaying).await?;
        let skipped = state
            .queue
            .current()
            .filter(|_| state.status.is_active())
            .map(describe)
            .ok_or(Rejection::NothingPlaying)?;

        self.drive(&channel, &mut state, Input::Skip).await;

        let reply = Reply::new("Skipped").description(skipped);
        Ok(match state.queue.current() {
            Some(next) => reply.field("Up next", describe(next), false),
            None => reply,
        })
    }

    /// Stops playback, clears the queue and leaves the channel.
    pub async fn stop(&self, ctx: &dyn CommandContext) -> Outcome {
        let id = ctx.channel().ok_or(Rejection::NotInVoice)?;
        let channel = self.channel(id).ok_or(Rejection::NothingPlaying)?;
        channel.stop_requested();

        let mut state = channel.state.lock().await;
        if state.released {
            return Err(Rejection::NothingPlaying);
        }
        let songs = state.queue.len();
        self.drive(&channel, &mut state, Input::Stop).await;

        Ok(Reply::new("Stopped").description(format!("Cleared {songs} queued songs.")))
    }

    pub async fn pause(&self, ctx: &dyn CommandContext) -> Outcome {
        let (channel, mut state) = self.lock_existing(ctx, Rejection::NothingPlaying).await?;
        if !matches!(state.status, Status::Playing | Status::Buffering) {
            return Err(Rejection::NothingPlaying);
        }

        self.drive(&channel, &mut state, Input::Pause).await;
        Ok(Reply::new("Paused"))
    }

    pub async fn resume(&self, ctx: &dyn CommandContext) -> Outcome {
        let (channel, mut state) = self.lock_existing(ctx, Rejection::NothingPaused).await?;
        if state.status != Status::Paused {
            return Err(Rejection::NothingPaused);
        }

        self.drive(&channel, &mut state, Input::Resume).await;
        Ok(Reply::new("Resumed"))
    }

    /// Sets the volume from user input such as `"40"` or `"40%"`. Applies to
    /// the rendering stream immediately.
    pub async fn set_volume(&self, ctx: &dyn CommandContext, input: &str) -> Outcome {
        let volume = Volume::parse(input).map_err(|e| {
            debug!("rejecting volume \"{input}\": {e}");
            Rejection::InvalidVolume
        })?;

        let (_, mut state) = self.lock_existing(ctx, Rejection::NothingPlaying).await?;
        state.queue.set_volume(volume);
        if let Some(session) = &state.session {
            session.set_volume(volume);
        }

        Ok(Reply::new("Volume").description(volume.to_string()))
    }

    /// Changes the volume by `delta` percentage points, clamped to
    /// `[0, 100]`.
    pub async fn adjust_volume(&self, ctx: &dyn CommandContext, delta: f64) -> Outcome {
        let (_, mut state) = self.lock_existing(ctx, Rejection::NothingPlaying).await?;
        let volume = state.queue.adjust_volume(delta);
        if let Some(session) = &state.session {
            session.set_volume(volume);
        }

        Ok(Reply::new("Volume").description(volume.to_string()))
    }

    pub async fn toggle_loop(&self, ctx: &dyn CommandContext) -> Outcome {
        let (_, mut state) = self.lock_existing(ctx, Rejection::NothingPlaying).await?;
        let enabled = state.queue.toggle_repeat_track();
        Ok(Reply::new(toggled("Loop", enabled)))
    }

    pub async fn toggle_loop_queue(&self, ctx: &dyn CommandContext) -> Outcome {
        let (_, mut state) = self.lock_existing(ctx, Rejection::NothingPlaying).await?;
        let enabled = state.queue.toggle_repeat_queue();
        Ok(Reply::new(toggled("Queue loop", enabled)))
    }

    pub async fn toggle_shuffle(&self, ctx: &dyn CommandContext) -> Outcome {
        let (channel, mut state) = self.lock_existing(ctx, Rejection::NothingPlaying).await?;
        let enabled = state.queue.toggle_shuffle();
        if enabled {
            self.publish(&channel, &state);
        }
        Ok(Reply::new(toggled("Shuffle", enabled)))
    }

    /// Removes the song at 1-based `position` of the upcoming songs.
    pub async fn remove_song(&self, ctx: &dyn CommandContext, position: usize) -> Outcome {
        let (channel, mut state) = self.lock_existing(ctx, Rejection::EmptyQueue).await?;
        let len = state.queue.len();
        if len == 0 {
            return Err(Rejection::EmptyQueue);
        }

        let removed = state
            .queue
            .remove(position)
            .map_err(|_| Rejection::InvalidPosition { position, len })?;
        self.publish(&channel, &state);

        Ok(Reply::new("Removed").description(describe(&removed)))
    }

    pub async fn clear_queue(&self, ctx: &dyn CommandContext) -> Outcome {
        let (channel, mut state) = self.lock_existing(ctx, Rejection::EmptyQueue).await?;
        let cleared = state.queue.clear();
        if cleared == 0 {
            return Err(Rejection::EmptyQueue);
        }
        self.publish(&channel, &state);

        Ok(Reply::new("Queue cleared").description(format!("Removed {cleared} songs.")))
    }

    /// Plays the song at 1-based `position` right away. The songs before it
    /// move to the end of the queue.
    pub async fn jump_to_song(&self, ctx: &dyn CommandContext, position: usize) -> Outcome {
        let (channel, mut state) = self.lock_existing(ctx, Rejection::EmptyQueue).await?;
        let len = state.queue.len();
        if len == 0 {
            return Err(Rejection::EmptyQueue);
        }

        state
            .queue
            .jump(position)
            .map_err(|_| Rejection::InvalidPosition { position, len })?;

        if state.status.is_active() {
            self.drive(&channel, &mut state, Input::Skip).await;
        } else if state.status == Status::Idle {
            self.step(&channel, &mut state, Step::Effect(Effect::Advance))
                .await;
        } else {
            self.publish(&channel, &state);
        }

        let reply = Reply::new("Jumped");
        Ok(match state.queue.current() {
            Some(track) => reply.description(describe(track)),
            None => reply,
        })
    }

    pub async fn show_queue(&self, ctx: &dyn CommandContext) -> Outcome {
        let (_, state) = self.lock_existing(ctx, Rejection::EmptyQueue).await?;
        let queue = &state.queue;
        if queue.is_empty() {
            return Err(Rejection::EmptyQueue);
        }

        let mut lines = Vec::with_capacity(QUEUE_PAGE + 2);
        if let Some(current) = queue.current() {
            lines.push(format!("Now playing: {}", describe(current)));
        }
        for (index, track) in queue.songs().take(QUEUE_PAGE).enumerate() {
            lines.push(format!("{}. {}", index + 1, describe(track)));
        }
        if queue.len() > QUEUE_PAGE {
            lines.push(format!("and {} more", queue.len() - QUEUE_PAGE));
        }

        Ok(Reply::new("Queue")
            .description(lines.join("\n"))
            .field("Volume", queue.volume().to_string(), true)
            .field("Songs", queue.len().to_string(), true))
    }

    pub async fn show_now_playing(&self, ctx: &dyn CommandContext) -> Outcome {
        let (_, state) = self.lock_existing(ctx, Rejection::NothingPlaying).await?;
        let track = state
            .queue
            .current()
            .filter(|_| state.status.is_active())
            .ok_or(Rejection::NothingPlaying)?;

        let mut reply = now_playing(track, &state.queue);
        if state.status == Status::Paused {
            reply.title = "Paused".to_owned();
        }
        Ok(reply)
    }
}

/// Logs why the current track cannot be played and drops it.
fn drop_broken(id: ChannelId, state: &mut ChannelState, error: &Error) -> Input {
    let failure = Failure::from(error.kind);
    if let Some(track) = state.queue.discard_current() {
        warn!("{id}: skipping {track} ({failure}): {error}");
    }
    Input::AcquireFailed
}

fn find(queue: &Queue, id: Uuid) -> Option<(usize, &Track)> {
    queue.songs().enumerate().find(|(_, track)| track.id() == id)
}

fn describe(track: &Track) -> String {
    let title = match track.artist() {
        Some(artist) => format!("{artist} - {}", track.title()),
        None => track.title().to_owned(),
    };
    match track.duration() {
        Some(duration) => format!("{title} ({})", format_duration(duration)),
        None => title,
    }
}

fn toggled(what: &str, enabled: bool) -> String {
    format!("{what} {}", if enabled { "enabled" } else { "disabled" })
}

fn now_playing(track: &Track, queue: &Queue) -> Reply {
    let repeat = match (queue.repeat_track(), queue.repeat_queue()) {
        (true, _) => "Track",
        (false, true) => "Queue",
        (false, false) => "Off",
    };

    Reply::new("Now playing")
        .description(format!("{} <{}>", describe(track), track.url()))
        .field(
            "Duration",
            track
                .duration()
                .map_or_else(|| "live".to_owned(), format_duration),
            true,
        )
        .field("Requested by", track.requester(), true)
        .field("Volume", queue.volume().to_string(), true)
        .field("Loop", repeat, true)
        .field("Shuffle", if queue.shuffle() { "On" } else { "Off" }, true)
        .field("Source", track.label(), true)
        .thumbnail(track.thumbnail().map(ToString::to_string))
}

/// How long a channel has had nothing to do.
pub(crate) fn idle_for(state: &ChannelState) -> Duration {
    state
        .idle_since
        .map_or(Duration::ZERO, |since| since.elapsed())
}
