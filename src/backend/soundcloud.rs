//! SoundCloud API v2.
//!
//! Every request carries the public `client_id`. Streams are exposed as
//! "transcodings" that must be resolved once more into a signed media URL;
//! progressive (plain HTTP) transcodings are preferred over HLS.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::{host_matches, slug_terms, Backend, BackendKind, Candidate, Role};
use crate::{
    config::{Config, Secret},
    error::{Error, Result},
    http,
    track::StreamHandle,
};

pub struct SoundCloud {
    client_id: Secret,
    http: http::Client,
}

#[derive(Debug, Deserialize)]
struct User {
    username: String,
}

#[derive(Debug, Deserialize)]
struct Format {
    protocol: String,
    mime_type: String,
}

#[derive(Debug, Deserialize)]
struct Transcoding {
    url: String,
    format: Format,
    #[serde(default)]
    snipped: bool,
}

#[derive(Debug, Default, Deserialize)]
struct Media {
    #[serde(default)]
    transcodings: Vec<Transcoding>,
}

#[derive(Debug, Deserialize)]
struct Track {
    #[serde(default)]
    kind: String,
    title: String,
    permalink_url: String,
    #[serde(default)]
    duration: u64,
    #[serde(default)]
    artwork_url: Option<String>,
    #[serde(default)]
    user: Option<User>,
    #[serde(default = "streamable_default")]
    streamable: bool,
    #[serde(default)]
    policy: Option<String>,
    #[serde(default)]
    media: Media,
}

fn streamable_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct Collection {
    collection: Vec<Track>,
}

#[derive(Debug, Deserialize)]
struct Location {
    url: String,
}

impl Track {
    fn is_streamable(&self) -> bool {
        self.streamable && self.policy.as_deref() != Some("BLOCK")
    }

    fn into_candidate(self) -> Option<Candidate> {
        if self.kind != "track" {
            return None;
        }

        Some(Candidate {
            streamable: self.is_streamable(),
            url: Url::parse(&self.permalink_url).ok()?,
            title: self.title,
            artist: self.user.map(|user| user.username),
            duration: Some(Duration::from_millis(self.duration)).filter(|d| !d.is_zero()),
            thumbnail: self.artwork_url.and_then(|url| Url::parse(&url).ok()),
        })
    }

    /// Picks the transcoding to stream: full tracks over previews, then
    /// progressive over HLS.
    fn transcoding(&self) -> Option<&Transcoding> {
        self.media
            .transcodings
            .iter()
            .filter(|t| !t.snipped)
            .min_by_key(|t| match t.format.protocol.as_str() {
                "progressive" => 0,
                "hls" => 1,
                _ => 2,
            })
    }
}

impl SoundCloud {
    const API_URL: &'static str = "https://api-v2.soundcloud.com/";

    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(1);
    const RATE_LIMIT_CALLS_PER_INTERVAL: u32 = 8;

    /// Media URLs are signed for a limited time that is not advertised.
    const STREAM_TTL: Duration = Duration::from_secs(10 * 60);

    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config, client_id: Secret) -> Result<Self> {
        Ok(Self {
            client_id,
            http: http::Client::new(
                config,
                Self::RATE_LIMIT_INTERVAL,
                Self::RATE_LIMIT_CALLS_PER_INTERVAL,
            )?,
        })
    }

    fn endpoint(path: &str) -> Result<Url> {
        Ok(Url::parse(Self::API_URL)?.join(path)?)
    }

    async fn resolve(&self, url: &Url) -> Result<Track> {
        let request = self.http.get(
            Self::endpoint("resolve")?,
            &[("url", url.as_str()), ("client_id", self.client_id.expose())],
        );
        let track: Track = self.http.json(request).await?;
        if track.kind != "track" {
            return Err(Error::invalid_argument(format!(
                "{url} is a {}, not a track",
                track.kind
            )));
        }
        Ok(track)
    }
}

#[async_trait]
impl Backend for SoundCloud {
    fn kind(&self) -> BackendKind {
        BackendKind::SoundCloud
    }

    fn role(&self) -> Role {
        Role::Secondary
    }

    fn matches(&self, url: &Url) -> bool {
        host_matches(url, &["soundcloud.com", "snd.sc"])
    }

    /// Permalinks read `artist-name/track-title`.
    fn permalink_terms(&self, url: &Url) -> Option<String> {
        slug_terms(url)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>> {
        let limit = limit.to_string();
        let request = self.http.get(
            Self::endpoint("search/tracks")?,
            &[
                ("q", query),
                ("limit", limit.as_str()),
                ("client_id", self.client_id.expose()),
            ],
        );
        let results: Collection = self.http.json(request).await?;

        Ok(results
            .collection
            .into_iter()
            .filter_map(Track::into_candidate)
            .collect())
    }

    async fn fetch(&self, url: &Url) -> Result<Candidate> {
        self.resolve(url)
            .await?
            .into_candidate()
            .ok_or_else(|| Error::data_loss(format!("{url} returned an unusable track")))
    }

    async fn stream(&self, url: &Url) -> Result<StreamHandle> {
        let track = self.resolve(url).await?;
        if !track.is_streamable() {
            return Err(Error::permission_denied(format!("{url} is not streamable")));
        }

        let transcoding = track
            .transcoding()
            .ok_or_else(|| Error::not_found(format!("{url} has no full-length stream")))?;

        let location_url = Url::parse(&transcoding.url).map_err(|e| Error::data_loss(e.to_string()))?;
        let request = self
            .http
            .get(location_url, &[("client_id", self.client_id.expose())]);
        let location: Location = self.http.json(request).await?;

        let stream_url = Url::parse(&location.url).map_err(|e| Error::data_loss(e.to_string()))?;
        Ok(StreamHandle::new(
            stream_url,
            Some(transcoding.format.mime_type.clone()),
            Some(Self::STREAM_TTL),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(json: &str) -> Track {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn blocked_tracks_are_not_streamable() {
        let track = track(
            r#"{"kind": "track", "title": "t", "permalink_url": "https://soundcloud.com/a/t",
                "policy": "BLOCK"}"#,
        );
        let candidate = track.into_candidate().unwrap();
        assert!(!candidate.streamable);
    }

    #[test]
    fn prefers_full_progressive_transcoding() {
        let track = track(
            r#"{"kind": "track", "title": "t", "permalink_url": "https://soundcloud.com/a/t",
                "duration": 30000,
                "user": {"username": "a"},
                "media": {"transcodings": [
                    {"url": "https://x/hls", "format": {"protocol": "hls", "mime_type": "audio/mpeg"}},
                    {"url": "https://x/snip", "snipped": true,
                     "format": {"protocol": "progressive", "mime_type": "audio/mpeg"}},
                    {"url": "https://x/prog", "format": {"protocol": "progressive", "mime_type": "audio/mpeg"}}
                ]}}"#,
        );
        assert_eq!(track.transcoding().unwrap().url, "https://x/prog");

        let candidate = track.into_candidate().unwrap();
        assert_eq!(candidate.artist.as_deref(), Some("a"));
        assert_eq!(candidate.duration, Some(Duration::from_secs(30)));
        assert!(candidate.streamable);
    }

    #[test]
    fn playlists_are_not_candidates() {
        let track = track(
            r#"{"kind": "playlist", "title": "p", "permalink_url": "https://soundcloud.com/a/sets/p"}"#,
        );
        assert!(track.into_candidate().is_none());
    }
}
