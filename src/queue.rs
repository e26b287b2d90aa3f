//! Per-channel playback queue.
//!
//! The queue owns the pending songs, the current track and a bounded
//! history of played tracks, most recent first. It is a plain data
//! structure: it never performs I/O and is mutated under the channel lock.

use std::{collections::VecDeque, fmt};

use crate::{
    error::{Error, Result},
    track::Track,
};

/// Playback volume as a ratio in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Volume(f64);

impl Volume {
    pub const MIN: Self = Self(0.0);
    pub const MAX: Self = Self(1.0);

    /// # Errors
    ///
    /// Returns `OutOfRange` unless `ratio` is within `[0, 1]`.
    pub fn from_ratio(ratio: f64) -> Result<Self> {
        if (0.0..=1.0).contains(&ratio) {
            Ok(Self(ratio))
        } else {
            Err(Error::out_of_range(format!("volume ratio {ratio} not within [0, 1]")))
        }
    }

    /// # Errors
    ///
    /// Returns `OutOfRange` unless `percent` is within `[0, 100]`.
    pub fn from_percent(percent: f64) -> Result<Self> {
        if (0.0..=100.0).contains(&percent) {
            Ok(Self(percent / 100.0))
        } else {
            Err(Error::out_of_range(format!("volume {percent}% not within [0, 100]")))
        }
    }

    /// Parses user input such as `"42"` or `"42%"`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for non-numeric input and `OutOfRange`
    /// outside `[0, 100]`.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let number = input.strip_suffix('%').unwrap_or(input).trim();
        let percent: f64 = number.parse()?;
        Self::from_percent(percent)
    }

    #[must_use]
    pub fn ratio(self) -> f64 {
        self.0
    }

    #[must_use]
    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percent(self) -> u8 {
        (self.0 * 100.0).round() as u8
    }

    /// Adds `delta` percentage points, clamping to `[0, 100]`.
    #[must_use]
    pub fn adjusted(self, delta: f64) -> Self {
        let ratio = self.0 + delta / 100.0;
        Self(if ratio.is_nan() { self.0 } else { ratio.clamp(0.0, 1.0) })
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self(0.5)
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

#[derive(Debug)]
pub struct Queue {
    songs: VecDeque<Track>,
    current: Option<Track>,
    history: VecDeque<Track>,
    max_history: usize,

    repeat_track: bool,
    repeat_queue: bool,
    shuffle: bool,
    volume: Volume,

    /// Where replies and notifications for this channel go.
    output: Option<String>,

    rng: fastrand::Rng,
}

impl Queue {
    #[must_use]
    pub fn new(max_history: usize, volume: Volume) -> Self {
        Self {
            songs: VecDeque::new(),
            current: None,
            history: VecDeque::with_capacity(max_history + 1),
            max_history,
            repeat_track: false,
            repeat_queue: false,
            shuffle: false,
            volume,
            output: None,
            rng: fastrand::Rng::new(),
        }
    }

    /// Makes shuffling deterministic.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    /// Adds a track and returns its 1-based position among the pending
    /// songs. With shuffle on, the position is uniformly random.
    pub fn enqueue(&mut self, track: Track) -> usize {
        let index = if self.shuffle {
            self.rng.usize(..=self.songs.len())
        } else {
            self.songs.len()
        };

        self.songs.insert(index, track);
        index + 1
    }

    /// Moves on to the next track and returns it, or `None` when playback
    /// is over.
    ///
    /// With repeat-track on, the current track stays. Otherwise it goes to
    /// the front of the history; with repeat-queue on, an exhausted queue
    /// is refilled from the history, minus the track that just ended.
    pub fn advance(&mut self) -> Option<&Track> {
        if self.repeat_track && self.current.is_some() {
            return self.current.as_ref();
        }
        self.skip()
    }

    /// Like [`Queue::advance`], but moves past the current track even with
    /// repeat-track on.
    pub fn skip(&mut self) -> Option<&Track> {
        let previous = self.current.take();
        let had_current = previous.is_some();
        if let Some(track) = previous {
            self.history.push_front(track);
            self.history.truncate(self.max_history);
        }

        if self.repeat_queue && self.songs.is_empty() && had_current {
            self.songs.extend(self.history.iter().skip(1).cloned());
            if self.shuffle {
                self.rng.shuffle(self.songs.make_contiguous());
            }
        }

        self.current = self.songs.pop_front();
        self.current.as_ref()
    }

    /// Drops the current track without recording it, so that a broken track
    /// is not replayed by repeat-track.
    pub fn discard_current(&mut self) -> Option<Track> {
        self.current.take()
    }

    /// Removes the song at 1-based `position`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `position` is not within `[1, len]`.
    pub fn remove(&mut self, position: usize) -> Result<Track> {
        self.check_position(position)?;
        self.songs
            .remove(position - 1)
            .ok_or_else(|| Error::internal("checked position vanished"))
    }

    /// Rotates the songs before 1-based `position` to the tail, so the song
    /// at `position` is next.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `position` is not within `[1, len]`.
    pub fn jump(&mut self, position: usize) -> Result<()> {
        self.check_position(position)?;
        self.songs.rotate_left(position - 1);
        Ok(())
    }

    fn check_position(&self, position: usize) -> Result<()> {
        if (1..=self.songs.len()).contains(&position) {
            Ok(())
        } else {
            Err(Error::out_of_range(format!(
                "position {position} not within [1, {}]",
                self.songs.len()
            )))
        }
    }

    /// Returns the new state.
    pub fn toggle_repeat_track(&mut self) -> bool {
        self.repeat_track = !self.repeat_track;
        self.repeat_track
    }

    /// Returns the new state.
    pub fn toggle_repeat_queue(&mut self) -> bool {
        self.repeat_queue = !self.repeat_queue;
        self.repeat_queue
    }

    /// Returns the new state. Enabling shuffles the pending songs in place.
    pub fn toggle_shuffle(&mut self) -> bool {
        self.shuffle = !self.shuffle;
        if self.shuffle && self.songs.len() > 1 {
            // Fisher-Yates
            self.rng.shuffle(self.songs.make_contiguous());
        }
        self.shuffle
    }

    pub fn set_volume(&mut self, volume: Volume) {
        self.volume = volume;
    }

    /// Adds `delta` percentage points and returns the clamped result.
    pub fn adjust_volume(&mut self, delta: f64) -> Volume {
        self.volume = self.volume.adjusted(delta);
        self.volume
    }

    /// Removes every pending song. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let len = self.songs.len();
        self.songs.clear();
        len
    }

    /// Replaces the next song with `track` if it is still the same song,
    /// as after preloading a copy of it.
    pub fn replace_next(&mut self, track: Track) -> bool {
        match self.songs.front_mut() {
            Some(next) if next.id() == track.id() => {
                *next = track;
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut Track> {
        self.current.as_mut()
    }

    /// The song that plays after the current one.
    #[must_use]
    pub fn next(&self) -> Option<&Track> {
        self.songs.front()
    }

    pub fn songs(&self) -> impl ExactSizeIterator<Item = &Track> {
        self.songs.iter()
    }

    /// Played tracks, most recent first.
    pub fn history(&self) -> impl ExactSizeIterator<Item = &Track> {
        self.history.iter()
    }

    /// Number of pending songs, excluding the current track.
    #[must_use]
    pub fn len(&self) -> usize {
        self.songs.len()
    }

    /// No pending songs and nothing current.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.songs.is_empty() && self.current.is_none()
    }

    #[must_use]
    pub fn repeat_track(&self) -> bool {
        self.repeat_track
    }

    #[must_use]
    pub fn repeat_queue(&self) -> bool {
        self.repeat_queue
    }

    #[must_use]
    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    #[must_use]
    pub fn volume(&self) -> Volume {
        self.volume
    }

    #[must_use]
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn set_output(&mut self, output: Option<String>) {
        self.output = output;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{BackendKind, Candidate},
        error::ErrorKind,
    };
    use url::Url;

    fn track(title: &str) -> Track {
        let candidate = Candidate {
            title: title.to_owned(),
            artist: None,
            url: Url::parse(&format!("https://www.youtube.com/watch?v={title}")).unwrap(),
            duration: None,
            thumbnail: None,
            streamable: true,
        };
        Track::new(candidate, BackendKind::YouTube, "tester")
    }

    fn queue() -> Queue {
        Queue::new(10, Volume::default()).with_seed(7)
    }

    fn titles(queue: &Queue) -> Vec<&str> {
        queue.songs().map(Track::title).collect()
    }

    #[test]
    fn volume_percent_is_stored_exactly() {
        for percent in [0.0, 1.0, 42.0, 99.5, 100.0] {
            let volume = Volume::from_percent(percent).unwrap();
            assert_eq!(volume.ratio(), percent / 100.0);
        }
    }

    #[test]
    fn invalid_volume_leaves_queue_untouched() {
        let mut queue = queue();
        queue.set_volume(Volume::parse("30").unwrap());

        for input in ["abc", "", "-1", "101", "NaN"] {
            let err = Volume::parse(input).unwrap_err();
            assert!(matches!(err.kind, ErrorKind::InvalidArgument | ErrorKind::OutOfRange));
        }
        assert_eq!(queue.volume().ratio(), 0.3);
        assert_eq!(Volume::parse(" 75% ").unwrap().percent(), 75);
    }

    #[test]
    fn adjust_volume_clamps() {
        let mut queue = Queue::new(10, Volume::from_percent(95.0).unwrap());
        assert_eq!(queue.adjust_volume(10.0), Volume::MAX);
        assert_eq!(queue.adjust_volume(-200.0), Volume::MIN);
        assert_eq!(queue.adjust_volume(10.0).percent(), 10);
    }

    #[test]
    fn enqueue_then_remove_first() {
        let mut queue = queue();
        queue.enqueue(track("a"));
        queue.enqueue(track("b"));
        let before = queue.len();

        assert_eq!(queue.enqueue(track("c")), 3);
        let removed = queue.remove(1).unwrap();
        assert_eq!(removed.title(), "a");
        assert_eq!(queue.len(), before);
        assert_eq!(titles(&queue), ["b", "c"]);
    }

    #[test]
    fn remove_out_of_range() {
        let mut queue = queue();
        queue.enqueue(track("a"));
        assert_eq!(queue.remove(0).unwrap_err().kind, ErrorKind::OutOfRange);
        assert_eq!(queue.remove(2).unwrap_err().kind, ErrorKind::OutOfRange);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn jump_rotates_preceding_songs_to_tail() {
        let mut queue = queue();
        for title in ["a", "b", "c", "d"] {
            queue.enqueue(track(title));
        }

        queue.jump(3).unwrap();
        assert_eq!(titles(&queue), ["c", "d", "a", "b"]);

        queue.jump(1).unwrap();
        assert_eq!(titles(&queue), ["c", "d", "a", "b"]);
        assert!(queue.jump(5).is_err());
    }

    #[test]
    fn repeat_track_replays_current() {
        let mut queue = queue();
        queue.enqueue(track("a"));
        queue.enqueue(track("b"));
        queue.advance();
        queue.toggle_repeat_track();

        let id = queue.current().map(Track::id);
        for _ in 0..3 {
            assert_eq!(queue.advance().map(Track::id), id);
        }
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.history().len(), 0);
    }

    #[test]
    fn advance_records_bounded_history() {
        let mut queue = Queue::new(2, Volume::default());
        for title in ["a", "b", "c", "d"] {
            queue.enqueue(track(title));
        }
        while queue.advance().is_some() {}

        let history: Vec<_> = queue.history().map(Track::title).collect();
        assert_eq!(history, ["d", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn repeat_queue_refills_from_history() {
        let mut queue = queue();
        for title in ["a", "b", "c"] {
            queue.enqueue(track(title));
        }
        queue.toggle_repeat_queue();

        let mut played = Vec::new();
        for _ in 0..20 {
            let title = queue.advance().map(|track| track.title().to_owned());
            played.push(title.unwrap());
            assert!(queue.history().len() <= 10);
        }

        assert_eq!(&played[..3], ["a", "b", "c"]);
        // the track that just ended is not refilled
        assert_ne!(played[3], "c");
    }

    #[test]
    fn repeat_queue_with_single_track_ends() {
        let mut queue = queue();
        queue.enqueue(track("a"));
        queue.toggle_repeat_queue();
        assert!(queue.advance().is_some());
        assert!(queue.advance().is_none());
    }

    #[test]
    fn shuffled_enqueue_stays_in_bounds() {
        let mut queue = queue();
        queue.toggle_shuffle();
        for i in 0..50 {
            let len = queue.len();
            let position = queue.enqueue(track(&i.to_string()));
            assert!((1..=len + 1).contains(&position));
        }
        assert_eq!(queue.len(), 50);
    }

    #[test]
    fn toggle_shuffle_permutes() {
        let mut queue = queue();
        let names: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        for name in &names {
            queue.enqueue(track(name));
        }

        assert!(queue.toggle_shuffle());
        let mut shuffled: Vec<String> = titles(&queue).into_iter().map(ToOwned::to_owned).collect();
        assert_ne!(shuffled, names);
        shuffled.sort_by_key(|name| name.parse::<u32>().unwrap());
        assert_eq!(shuffled, names);

        assert!(!queue.toggle_shuffle());
    }

    #[test]
    fn skip_ignores_repeat_track() {
        let mut queue = queue();
        queue.enqueue(track("a"));
        queue.enqueue(track("b"));
        queue.toggle_repeat_track();
        queue.advance();

        assert_eq!(queue.skip().map(Track::title), Some("b"));
        assert_eq!(queue.history().map(Track::title).collect::<Vec<_>>(), ["a"]);
    }

    #[test]
    fn replace_next_only_when_unchanged() {
        let mut queue = queue();
        queue.enqueue(track("a"));
        let mut copy = queue.next().unwrap().clone();
        let url = copy.url().clone();
        copy.preload(crate::track::StreamHandle::new(url, None, None));

        queue.enqueue(track("b"));
        queue.jump(2).unwrap();
        assert!(!queue.replace_next(copy.clone()));

        queue.jump(2).unwrap();
        assert!(queue.replace_next(copy));
        assert!(queue.next().unwrap().is_preloaded());
    }

    #[test]
    fn discarded_track_is_not_replayed() {
        let mut queue = queue();
        queue.enqueue(track("broken"));
        queue.enqueue(track("b"));
        queue.toggle_repeat_track();
        queue.advance();

        queue.discard_current();
        assert_eq!(queue.advance().map(Track::title), Some("b"));
        assert_eq!(queue.history().len(), 0);
    }
}
