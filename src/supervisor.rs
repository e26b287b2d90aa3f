//! Periodic reclamation of stale resources.
//!
//! Every sweep:
//! 1. purges expired entries from every cache bucket;
//! 2. trims buckets that somehow grew over capacity;
//! 3. tears down channels whose voice connection died without a signal;
//! 4. releases idle channels (nothing playing, nothing queued) that the
//!    reclaim predicate accepts. Without a predicate, a channel has to stay
//!    idle for a whole interval first.
//!
//! Channel releases run under the channel's lock, so they never interleave
//! with a command on the same channel.

use std::{fmt, time::Duration};

use tokio::time::MissedTickBehavior;

use crate::{
    player::{self, Player},
    session::Input,
    voice::ChannelId,
};

/// An idle channel, as offered to the reclaim predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdleChannel {
    pub channel: ChannelId,
    /// Whether the voice connection is still up.
    pub connected: bool,
    pub idle_for: Duration,
}

type Reclaim = Box<dyn Fn(&IdleChannel) -> bool + Send + Sync>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Cache entries purged for being expired.
    pub expired: usize,
    /// Cache entries evicted to restore the size bound.
    pub evicted: usize,
    /// Channels torn down for a dead connection.
    pub sessions: usize,
    /// Idle channels released.
    pub queues: usize,
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} expired, {} evicted, {} dead sessions, {} idle queues",
            self.expired, self.evicted, self.sessions, self.queues
        )
    }
}

pub struct Supervisor {
    player: Player,
    interval: Duration,
    reclaim: Option<Reclaim>,
}

impl Supervisor {
    /// Sweeps at the configured interval and reclaims channels idle for at
    /// least one interval.
    #[must_use]
    pub fn new(player: Player) -> Self {
        let interval = player.config().sweep_interval;
        Self {
            player,
            interval,
            reclaim: None,
        }
    }

    /// Only reclaims idle channels for which `reclaim` returns `true`.
    #[must_use]
    pub fn with_reclaim<F>(mut self, reclaim: F) -> Self
    where
        F: Fn(&IdleChannel) -> bool + Send + Sync + 'static,
    {
        self.reclaim = Some(Box::new(reclaim));
        self
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn accepts(&self, idle: &IdleChannel) -> bool {
        match &self.reclaim {
            Some(reclaim) => reclaim(idle),
            None => idle.idle_for >= self.interval,
        }
    }

    /// Runs one sweep.
    pub async fn sweep(&self) -> SweepReport {
        let caches = self.player.resolver().caches();
        let mut report = SweepReport {
            expired: caches.cleanup(),
            evicted: caches.trim(),
            ..SweepReport::default()
        };

        for channel in self.player.all_channels() {
            let dead = self
                .player
                .reclaim(&channel, Input::ConnectionLost, |state| state.is_dead())
                .await;
            if dead {
                warn!("{}: connection died silently, released", channel.id);
                report.sessions += 1;
                continue;
            }

            let idle = self
                .player
                .reclaim(&channel, Input::Stop, |state| {
                    state.is_idle()
                        && self.accepts(&IdleChannel {
                            channel: channel.id,
                            connected: state.session.is_some(),
                            idle_for: player::idle_for(state),
                        })
                })
                .await;
            if idle {
                debug!("{}: idle, released", channel.id);
                report.queues += 1;
            }
        }

        report
    }

    /// Sweeps forever. The first sweep happens one interval from now.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            interval.tick().await;
            let report = self.sweep().await;
            if report == SweepReport::default() {
                trace!("sweep: nothing to do");
            } else {
                info!("sweep: {report}");
            }
            for stats in self.player.resolver().caches().stats() {
                trace!("{stats}");
            }
        }
    }
}
