//! Spotify Web API, used as a metadata catalog only.
//!
//! Authenticates with the client credentials grant. The access token is
//! cached and refreshed shortly before it expires.

use std::{sync::LazyLock, time::Duration};

use async_trait::async_trait;
use regex_lite::Regex;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use tokio::{sync::Mutex, time::Instant};
use url::Url;
use veil::Redact;

use super::{host_matches, Backend, BackendKind, Candidate, Role};
use crate::{
    config::{Config, Secret},
    error::{Error, ErrorKind, Result},
    http,
};

/// Matches the track id in `open.spotify.com/track/<id>` URLs, with an
/// optional locale segment, and in `spotify:track:<id>` URIs.
static TRACK_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://open\.spotify\.com/(?:intl-[a-z]{2}/)?track/|spotify:track:)([A-Za-z0-9]{22})")
        .unwrap_or_else(|e| unreachable!("static regex is valid: {e}"))
});

#[derive(Clone, Redact)]
struct Token {
    #[redact]
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Image {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct Album {
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct ExternalUrls {
    spotify: String,
}

#[derive(Debug, Deserialize)]
struct Track {
    name: String,
    #[serde(default)]
    artists: Vec<Artist>,
    #[serde(default)]
    duration_ms: u64,
    external_urls: ExternalUrls,
    #[serde(default)]
    album: Album,
}

#[derive(Debug, Deserialize)]
struct Page {
    items: Vec<Track>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: Page,
}

impl Track {
    fn into_candidate(self) -> Option<Candidate> {
        let artist = self
            .artists
            .into_iter()
            .map(|artist| artist.name)
            .collect::<Vec<_>>()
            .join(", ");

        Some(Candidate {
            title: self.name,
            artist: Some(artist).filter(|artist| !artist.is_empty()),
            url: Url::parse(&self.external_urls.spotify).ok()?,
            duration: Some(Duration::from_millis(self.duration_ms)).filter(|d| !d.is_zero()),
            thumbnail: self
                .album
                .images
                .first()
                .and_then(|image| Url::parse(&image.url).ok()),
            streamable: false,
        })
    }
}

pub struct Spotify {
    client_id: Secret,
    client_secret: Secret,
    token: Mutex<Option<Token>>,
    http: http::Client,
}

impl Spotify {
    const API_URL: &'static str = "https://api.spotify.com/v1/";
    const TOKEN_URL: &'static str = "https://accounts.spotify.com/api/token";

    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(30);
    const RATE_LIMIT_CALLS_PER_INTERVAL: u32 = 100;

    /// Refresh the token this long before it expires.
    const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config, client_id: Secret, client_secret: Secret) -> Result<Self> {
        Ok(Self {
            client_id,
            client_secret,
            token: Mutex::new(None),
            http: http::Client::new(
                config,
                Self::RATE_LIMIT_INTERVAL,
                Self::RATE_LIMIT_CALLS_PER_INTERVAL,
            )?,
        })
    }

    /// Extracts the 22 character base62 track id.
    #[must_use]
    pub fn track_id(url: &str) -> Option<&str> {
        TRACK_ID
            .captures(url)
            .and_then(|captures| captures.get(1))
            .map(|id| id.as_str())
    }

    /// Returns a valid access token, requesting a new one when needed.
    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if let Some(token) = token.as_ref() {
            if Instant::now() + Self::TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        debug!("requesting spotify access token");
        let request = self
            .http
            .post_form(
                Url::parse(Self::TOKEN_URL)?,
                &[("grant_type", "client_credentials")],
            )
            .basic_auth(self.client_id.expose(), Some(self.client_secret.expose()))
            .build()?;

        let response: TokenResponse = self.http.json(request).await?;
        let value = response.access_token;
        *token = Some(Token {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        });

        Ok(value)
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = Url::parse(Self::API_URL)?.join(path)?;
        let mut request = self.http.get(url, query);

        let token = self.access_token().await?;
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))?,
        );

        let result = self.http.json(request).await;
        if result
            .as_ref()
            .is_err_and(|e| e.kind == ErrorKind::Unauthenticated)
        {
            // Revoked early; do not reuse it.
            *self.token.lock().await = None;
        }
        result
    }
}

#[async_trait]
impl Backend for Spotify {
    fn kind(&self) -> BackendKind {
        BackendKind::Spotify
    }

    fn role(&self) -> Role {
        Role::Catalog
    }

    fn matches(&self, url: &Url) -> bool {
        url.scheme() == "spotify" || host_matches(url, &["open.spotify.com", "spotify.link"])
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>> {
        let limit = limit.clamp(1, 50).to_string();
        let response: SearchResponse = self
            .get(
                "search",
                &[("q", query), ("type", "track"), ("limit", limit.as_str())],
            )
            .await?;

        Ok(response
            .tracks
            .items
            .into_iter()
            .filter_map(Track::into_candidate)
            .collect())
    }

    async fn fetch(&self, url: &Url) -> Result<Candidate> {
        let id = Self::track_id(url.as_str()).ok_or_else(|| {
            Error::invalid_argument(format!("{url} is not a spotify track"))
        })?;

        let track: Track = self.get(&format!("tracks/{id}"), &[]).await?;
        track
            .into_candidate()
            .ok_or_else(|| Error::data_loss(format!("{url} returned an unusable track")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_ids() {
        assert_eq!(
            Spotify::track_id("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=abc"),
            Some("4uLU6hMCjMI75M1A2tKUQC")
        );
        assert_eq!(
            Spotify::track_id("https://open.spotify.com/intl-de/track/4uLU6hMCjMI75M1A2tKUQC"),
            Some("4uLU6hMCjMI75M1A2tKUQC")
        );
        assert_eq!(
            Spotify::track_id("spotify:track:4uLU6hMCjMI75M1A2tKUQC"),
            Some("4uLU6hMCjMI75M1A2tKUQC")
        );
        assert_eq!(
            Spotify::track_id("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M"),
            None
        );
    }

    #[test]
    fn catalog_candidates_are_not_streamable() {
        let track: Track = serde_json::from_str(
            r#"{"name": "Around the World",
                "artists": [{"name": "Daft Punk"}],
                "duration_ms": 429000,
                "external_urls": {"spotify": "https://open.spotify.com/track/1pKYYY0dkg23sQQXi0Q5zN"},
                "album": {"images": [{"url": "https://i.scdn.co/image/x"}]}}"#,
        )
        .unwrap();

        let candidate = track.into_candidate().unwrap();
        assert!(!candidate.streamable);
        assert_eq!(candidate.search_terms(), "Daft Punk Around the World");
        assert!(candidate.thumbnail.is_some());
    }
}
