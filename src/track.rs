//! Resolved tracks and their stream handles.

use std::{fmt, time::Duration};

use serde::Serialize;
use tokio::time::Instant;
use url::Url;
use uuid::Uuid;

use crate::backend::{BackendKind, Candidate};

/// A resolved, playable location of a track.
///
/// Backends hand out signed URLs that stop working after a while, so a handle
/// may carry an expiry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamHandle {
    url: Url,
    mime: Option<String>,
    acquired_at: Instant,
    expires_at: Option<Instant>,
}

impl StreamHandle {
    /// Handles this close to their expiry are not handed to a renderer.
    pub const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

    #[must_use]
    pub fn new(url: Url, mime: Option<String>, ttl: Option<Duration>) -> Self {
        let acquired_at = Instant::now();
        Self {
            url,
            mime,
            acquired_at,
            expires_at: ttl.map(|ttl| acquired_at + ttl),
        }
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    #[must_use]
    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Whether the handle is still good to start rendering with.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.expires_at
            .map_or(true, |expiry| Instant::now() + Self::EXPIRY_MARGIN < expiry)
    }
}

#[derive(Clone, Debug)]
pub struct Track {
    id: Uuid,
    title: String,
    artist: Option<String>,
    url: Url,
    duration: Option<Duration>,
    thumbnail: Option<Url>,
    requester: String,
    backend: BackendKind,
    label: String,
    stream: Option<StreamHandle>,
    preloaded: bool,
}

impl Track {
    #[must_use]
    pub fn new(candidate: Candidate, backend: BackendKind, requester: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: candidate.title,
            artist: candidate.artist,
            url: candidate.url,
            duration: candidate.duration,
            thumbnail: candidate.thumbnail,
            requester: requester.into(),
            backend,
            label: backend.label().to_owned(),
            stream: None,
            preloaded: false,
        }
    }

    /// Replaces the source label shown to users.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn artist(&self) -> Option<&str> {
        self.artist.as_deref()
    }

    /// Canonical source URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    #[must_use]
    pub fn thumbnail(&self) -> Option<&Url> {
        self.thumbnail.as_ref()
    }

    #[must_use]
    pub fn requester(&self) -> &str {
        &self.requester
    }

    /// The backend that streams this track.
    #[must_use]
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn stream(&self) -> Option<&StreamHandle> {
        self.stream.as_ref()
    }

    /// The attached handle, if it is still fresh.
    #[must_use]
    pub fn fresh_stream(&self) -> Option<&StreamHandle> {
        self.stream.as_ref().filter(|handle| handle.is_fresh())
    }

    pub fn attach(&mut self, handle: StreamHandle) {
        self.stream = Some(handle);
    }

    #[must_use]
    pub fn is_preloaded(&self) -> bool {
        self.preloaded
    }

    /// Attaches a preloaded handle.
    pub fn preload(&mut self, handle: StreamHandle) {
        self.stream = Some(handle);
        self.preloaded = true;
    }

    /// Points the track at another backend after its own failed to stream.
    ///
    /// Display metadata is kept; the locator, backend and label change.
    pub fn substitute(&mut self, backend: BackendKind, url: Url, label: impl Into<String>) {
        self.backend = backend;
        self.url = url;
        self.label = label.into();
        self.stream = None;
        self.preloaded = false;
    }

    /// Fields that are safe to publish to observers.
    #[must_use]
    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            title: self.title.clone(),
            url: self.url.to_string(),
            duration: self.duration.map(format_duration),
            thumbnail: self.thumbnail.as_ref().map(ToString::to_string),
            requester: self.requester.clone(),
            source: self.label.clone(),
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.artist {
            Some(artist) => write!(f, "{}: \"{} - {}\"", self.label, artist, self.title),
            None => write!(f, "{}: \"{}\"", self.label, self.title),
        }
    }
}

/// Public view of a [`Track`], without stream handles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TrackSummary {
    pub title: String,
    pub url: String,
    pub duration: Option<String>,
    pub thumbnail: Option<String>,
    pub requester: String,
    pub source: String,
}

/// Formats as `m:ss`, or `h:mm:ss` from one hour on.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, secs % 3600 / 60, secs % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track() -> Track {
        let candidate = Candidate {
            title: "Song".to_owned(),
            artist: None,
            url: Url::parse("https://soundcloud.com/a/song").unwrap(),
            duration: Some(Duration::from_secs(185)),
            thumbnail: None,
            streamable: true,
        };
        Track::new(candidate, BackendKind::SoundCloud, "alice")
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0:00");
        assert_eq!(format_duration(Duration::from_secs(185)), "3:05");
        assert_eq!(format_duration(Duration::from_secs(3600 + 62)), "1:01:02");
    }

    #[test]
    fn substitute_keeps_metadata() {
        let mut track = track();
        let handle = StreamHandle::new(track.url().clone(), None, None);
        track.preload(handle);

        let url = Url::parse("https://www.youtube.com/watch?v=abc").unwrap();
        track.substitute(BackendKind::YouTube, url.clone(), "YouTube (SoundCloud fallback)");

        assert_eq!(track.title(), "Song");
        assert_eq!(track.requester(), "alice");
        assert_eq!(track.url(), &url);
        assert_eq!(track.backend(), BackendKind::YouTube);
        assert!(track.stream().is_none());
        assert!(!track.is_preloaded());
    }

    #[test]
    fn summary_has_no_stream() {
        let summary = track().summary();
        assert_eq!(summary.duration.as_deref(), Some("3:05"));
        assert_eq!(summary.source, "SoundCloud");
    }

    #[tokio::test(start_paused = true)]
    async fn handle_freshness() {
        let url = Url::parse("https://cdn.example/a.opus").unwrap();
        let handle = StreamHandle::new(url, None, Some(Duration::from_secs(60)));
        assert!(handle.is_fresh());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!handle.is_fresh());
    }
}
