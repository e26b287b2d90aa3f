//! In-process voice provider that renders nothing.
//!
//! Records what it is asked to play and lets the caller end streams, break
//! them or drop connections at will. With `auto_finish`, every stream ends
//! on its own after the track duration (capped), which is enough to exercise
//! a player without a voice gateway.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

use super::{ChannelId, Connection, Playable, Provider, Renderer, Signal, SignalKind, Ticket};
use crate::error::{Error, Result};

/// A stream handed to a loopback renderer.
#[derive(Clone, Debug, PartialEq)]
pub struct Played {
    pub title: String,
    pub url: Url,
    pub ticket: Ticket,
    pub volume: f64,
}

#[derive(Default)]
struct ChannelRecord {
    signals: Option<UnboundedSender<Signal>>,
    alive: Option<Arc<AtomicBool>>,
    played: Vec<Played>,
    playing: Option<Ticket>,
    paused: bool,
    connects: usize,
}

#[derive(Default)]
struct State {
    channels: HashMap<ChannelId, ChannelRecord>,
    refused: HashSet<ChannelId>,
}

#[derive(Clone, Default)]
pub struct Loopback {
    state: Arc<Mutex<State>>,
    auto_finish: Option<Duration>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Loopback {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ends every stream by itself after its duration, but no later than
    /// `cap`.
    #[must_use]
    pub fn with_auto_finish(mut self, cap: Duration) -> Self {
        self.auto_finish = Some(cap);
        self
    }

    /// Makes the next connections to `channel` fail.
    pub fn refuse(&self, channel: ChannelId) {
        lock(&self.state).refused.insert(channel);
    }

    fn signal(&self, channel: ChannelId, kind: impl FnOnce(Ticket) -> SignalKind) -> bool {
        let state = lock(&self.state);
        let Some(record) = state.channels.get(&channel) else {
            return false;
        };
        let (Some(ticket), Some(signals)) = (record.playing, record.signals.as_ref()) else {
            return false;
        };
        signals.send(Signal { channel, kind: kind(ticket) }).is_ok()
    }

    /// Ends the current stream of `channel` as if it played to the end.
    pub fn finish(&self, channel: ChannelId) -> bool {
        self.signal(channel, |ticket| SignalKind::StreamIdle { ticket })
    }

    /// Breaks off the current stream of `channel`.
    pub fn fail(&self, channel: ChannelId, reason: &str) -> bool {
        self.signal(channel, |ticket| SignalKind::StreamError {
            ticket,
            reason: reason.to_owned(),
        })
    }

    /// Drops the connection of `channel` from the remote end.
    pub fn lose_connection(&self, channel: ChannelId) -> bool {
        let mut state = lock(&self.state);
        let Some(record) = state.channels.get_mut(&channel) else {
            return false;
        };
        if let Some(alive) = record.alive.take() {
            alive.store(false, Ordering::Relaxed);
        }
        record.playing = None;
        record
            .signals
            .take()
            .is_some_and(|signals| signals.send(Signal { channel, kind: SignalKind::ConnectionLost }).is_ok())
    }

    /// Marks the connection dead without signalling, as when a callback
    /// gets lost.
    pub fn kill_silently(&self, channel: ChannelId) {
        if let Some(alive) = lock(&self.state)
            .channels
            .get_mut(&channel)
            .and_then(|record| record.alive.take())
        {
            alive.store(false, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn played(&self, channel: ChannelId) -> Vec<Played> {
        lock(&self.state)
            .channels
            .get(&channel)
            .map(|record| record.played.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_connected(&self, channel: ChannelId) -> bool {
        lock(&self.state)
            .channels
            .get(&channel)
            .and_then(|record| record.alive.as_ref())
            .is_some_and(|alive| alive.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn is_playing(&self, channel: ChannelId) -> bool {
        lock(&self.state)
            .channels
            .get(&channel)
            .is_some_and(|record| record.playing.is_some() && !record.paused)
    }

    #[must_use]
    pub fn is_paused(&self, channel: ChannelId) -> bool {
        lock(&self.state)
            .channels
            .get(&channel)
            .is_some_and(|record| record.paused)
    }

    /// Number of successful connects to `channel`.
    #[must_use]
    pub fn connects(&self, channel: ChannelId) -> usize {
        lock(&self.state)
            .channels
            .get(&channel)
            .map_or(0, |record| record.connects)
    }
}

#[async_trait]
impl Provider for Loopback {
    async fn connect(
        &self,
        channel: ChannelId,
        signals: UnboundedSender<Signal>,
    ) -> Result<Box<dyn Connection>> {
        let mut state = lock(&self.state);
        if state.refused.contains(&channel) {
            return Err(Error::permission_denied(format!("cannot join {channel}")));
        }

        let alive = Arc::new(AtomicBool::new(true));
        let record = state.channels.entry(channel).or_default();
        record.signals = Some(signals);
        record.alive = Some(Arc::clone(&alive));
        record.playing = None;
        record.paused = false;
        record.connects += 1;

        Ok(Box::new(LoopbackConnection {
            channel,
            alive,
            loopback: self.clone(),
        }))
    }
}

struct LoopbackConnection {
    channel: ChannelId,
    alive: Arc<AtomicBool>,
    loopback: Loopback,
}

impl Connection for LoopbackConnection {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    fn create_renderer(&self) -> Result<Box<dyn Renderer>> {
        if !self.is_alive() {
            return Err(Error::unavailable(format!("{} is disconnected", self.channel)));
        }

        Ok(Box::new(LoopbackRenderer {
            channel: self.channel,
            loopback: self.loopback.clone(),
        }))
    }

    fn disconnect(&self) {
        self.alive.store(false, Ordering::Relaxed);
        let mut state = lock(&self.loopback.state);
        if let Some(record) = state.channels.get_mut(&self.channel) {
            // A newer connection may have replaced this one.
            if record
                .alive
                .as_ref()
                .is_some_and(|alive| Arc::ptr_eq(alive, &self.alive))
            {
                record.alive = None;
                record.signals = None;
                record.playing = None;
                record.paused = false;
            }
        }
    }
}

struct LoopbackRenderer {
    channel: ChannelId,
    loopback: Loopback,
}

impl LoopbackRenderer {
    fn with_record<T>(&self, f: impl FnOnce(&mut ChannelRecord) -> T) -> Option<T> {
        lock(&self.loopback.state).channels.get_mut(&self.channel).map(f)
    }
}

impl Renderer for LoopbackRenderer {
    fn play(&mut self, playable: Playable, ticket: Ticket) -> Result<()> {
        let played = Played {
            title: playable.title.clone(),
            url: playable.handle.url().clone(),
            ticket,
            volume: playable.volume.ratio(),
        };

        let connected = self
            .with_record(|record| {
                if record.alive.is_none() {
                    return false;
                }
                record.played.push(played);
                record.playing = Some(ticket);
                record.paused = false;
                true
            })
            .unwrap_or(false);

        if !connected {
            return Err(Error::unavailable(format!("{} is disconnected", self.channel)));
        }

        if let Some(cap) = self.loopback.auto_finish {
            let duration = playable.duration.map_or(cap, |duration| duration.min(cap));
            let loopback = self.loopback.clone();
            let channel = self.channel;
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                let current = {
                    let state = lock(&loopback.state);
                    state.channels.get(&channel).and_then(|record| {
                        (record.playing == Some(ticket) && !record.paused)
                            .then(|| record.signals.clone())
                            .flatten()
                    })
                };
                if let Some(signals) = current {
                    let _ = signals.send(Signal {
                        channel,
                        kind: SignalKind::StreamIdle { ticket },
                    });
                }
            });
        }

        Ok(())
    }

    fn pause(&mut self) -> bool {
        self.with_record(|record| {
            let paused = record.playing.is_some() && !record.paused;
            record.paused |= paused;
            paused
        })
        .unwrap_or(false)
    }

    fn resume(&mut self) -> bool {
        self.with_record(|record| std::mem::replace(&mut record.paused, false))
            .unwrap_or(false)
    }

    fn stop(&mut self) {
        self.with_record(|record| {
            record.playing = None;
            record.paused = false;
        });
    }
}
