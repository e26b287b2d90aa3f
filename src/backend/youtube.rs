//! YouTube through an Invidious-compatible API.
//!
//! Invidious exposes search and video metadata, including signed audio
//! stream URLs, without API keys. Signed URLs carry their expiry in the
//! `expire` query parameter as a UNIX timestamp.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Deserialize;
use serde_with::{serde_as, DefaultOnError, DisplayFromStr, PickFirst};
use url::Url;

use super::{host_matches, Backend, BackendKind, Candidate, Role};
use crate::{
    config::Config,
    error::{Error, Result},
    http,
    track::StreamHandle,
};

pub struct YouTube {
    api_url: Url,
    http: http::Client,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    quality: String,
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    video_id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    length_seconds: u64,
    #[serde(default)]
    video_thumbnails: Vec<Thumbnail>,
    #[serde(default)]
    live_now: bool,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct AdaptiveFormat {
    url: String,
    #[serde(rename = "type")]
    mime: String,
    #[serde_as(as = "DefaultOnError<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    bitrate: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Video {
    video_id: String,
    title: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    length_seconds: u64,
    #[serde(default)]
    video_thumbnails: Vec<Thumbnail>,
    #[serde(default)]
    adaptive_formats: Vec<AdaptiveFormat>,
}

impl YouTube {
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(1);
    const RATE_LIMIT_CALLS_PER_INTERVAL: u32 = 10;

    /// Lifetime assumed for stream URLs without an `expire` parameter.
    const DEFAULT_STREAM_TTL: Duration = Duration::from_secs(60 * 60);

    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            api_url: config.youtube.api_url.clone(),
            http: http::Client::new(
                config,
                Self::RATE_LIMIT_INTERVAL,
                Self::RATE_LIMIT_CALLS_PER_INTERVAL,
            )?,
        })
    }

    /// Canonical watch URL of a video.
    #[must_use]
    pub fn watch_url(video_id: &str) -> Url {
        let mut url = Url::parse("https://www.youtube.com/watch")
            .unwrap_or_else(|_| unreachable!("static url is valid"));
        url.query_pairs_mut().append_pair("v", video_id);
        url
    }

    /// Extracts the video id from the URL shapes users paste.
    #[must_use]
    pub fn video_id(url: &Url) -> Option<String> {
        let host = url.host_str()?.to_ascii_lowercase();
        let mut segments = url.path_segments()?.filter(|s| !s.is_empty());

        let id = if host == "youtu.be" {
            segments.next().map(ToOwned::to_owned)
        } else {
            match segments.next() {
                Some("watch") => url
                    .query_pairs()
                    .find(|(key, _)| key == "v")
                    .map(|(_, value)| value.into_owned()),
                Some("shorts" | "embed" | "live" | "v") => segments.next().map(ToOwned::to_owned),
                _ => None,
            }
        };

        id.filter(|id| {
            !id.is_empty()
                && id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.api_url.join(path)?)
    }

    fn thumbnail(&self, thumbnails: &[Thumbnail]) -> Option<Url> {
        let thumbnail = thumbnails
            .iter()
            .find(|t| t.quality == "high")
            .or_else(|| thumbnails.first())?;
        // Some instances return paths relative to themselves.
        self.api_url.join(&thumbnail.url).ok()
    }

    async fn video(&self, url: &Url) -> Result<Video> {
        let id = Self::video_id(url)
            .ok_or_else(|| Error::invalid_argument(format!("{url} is not a video url")))?;
        let endpoint = self.endpoint(&format!("api/v1/videos/{id}"))?;
        self.http.json(self.http.get(endpoint, &[])).await
    }

    /// Time to live of a signed stream URL.
    fn stream_ttl(url: &Url) -> Duration {
        let expire = url
            .query_pairs()
            .find(|(key, _)| key == "expire")
            .and_then(|(_, value)| value.parse::<u64>().ok());

        match expire {
            Some(expire) => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default();
                Duration::from_secs(expire).saturating_sub(now)
            }
            None => Self::DEFAULT_STREAM_TTL,
        }
    }
}

#[async_trait]
impl Backend for YouTube {
    fn kind(&self) -> BackendKind {
        BackendKind::YouTube
    }

    fn role(&self) -> Role {
        Role::Primary
    }

    fn matches(&self, url: &Url) -> bool {
        host_matches(url, &["youtube.com", "youtu.be"])
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>> {
        let endpoint = self.endpoint("api/v1/search")?;
        let request = self.http.get(endpoint, &[("q", query), ("type", "video")]);
        let items: Vec<SearchItem> = self.http.json(request).await?;

        Ok(items
            .into_iter()
            .filter(|item| item.kind == "video" && !item.live_now)
            .filter_map(|item| {
                let id = item.video_id?;
                Some(Candidate {
                    url: Self::watch_url(&id),
                    thumbnail: self.thumbnail(&item.video_thumbnails),
                    title: item.title,
                    artist: item.author,
                    duration: Some(Duration::from_secs(item.length_seconds))
                        .filter(|d| !d.is_zero()),
                    streamable: true,
                })
            })
            .take(limit)
            .collect())
    }

    async fn fetch(&self, url: &Url) -> Result<Candidate> {
        let video = self.video(url).await?;
        Ok(Candidate {
            url: Self::watch_url(&video.video_id),
            thumbnail: self.thumbnail(&video.video_thumbnails),
            title: video.title,
            artist: video.author,
            duration: Some(Duration::from_secs(video.length_seconds)).filter(|d| !d.is_zero()),
            streamable: true,
        })
    }

    async fn stream(&self, url: &Url) -> Result<StreamHandle> {
        let video = self.video(url).await?;
        let format = video
            .adaptive_formats
            .into_iter()
            .filter(|format| format.mime.starts_with("audio/"))
            .max_by_key(|format| format.bitrate)
            .ok_or_else(|| Error::not_found(format!("{url} has no audio stream")))?;

        let stream_url = Url::parse(&format.url).map_err(|e| Error::data_loss(e.to_string()))?;
        let ttl = Self::stream_ttl(&stream_url);
        let mime = format
            .mime
            .split(';')
            .next()
            .map(str::trim)
            .map(ToOwned::to_owned);

        Ok(StreamHandle::new(stream_url, mime, Some(ttl)))
    }
}
