//! External media backends.
//!
//! A backend knows how to recognise its own URLs, search its catalog, fetch
//! metadata for a canonical URL and, if it streams at all, turn a URL into a
//! playable [`StreamHandle`].
//!
//! Backends play one of three roles:
//! * [`Role::Primary`]: the default target of free-text searches and the
//!   fallback of every other backend.
//! * [`Role::Secondary`]: streamable, but falls back onto the primary backend
//!   when it cannot deliver.
//! * [`Role::Catalog`]: metadata only; its tracks are streamed by searching
//!   the primary backend.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    error::{Error, Result},
    track::StreamHandle,
};

pub mod soundcloud;
pub mod spotify;
pub mod youtube;

pub use soundcloud::SoundCloud;
pub use spotify::Spotify;
pub use youtube::YouTube;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    YouTube,
    SoundCloud,
    Spotify,
}

impl BackendKind {
    /// Human readable source label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::YouTube => "YouTube",
            Self::SoundCloud => "SoundCloud",
            Self::Spotify => "Spotify",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Primary,
    Secondary,
    Catalog,
}

/// A search result or fetched item, before it becomes a [`Track`](crate::track::Track).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub title: String,
    pub artist: Option<String>,
    pub url: Url,
    pub duration: Option<Duration>,
    pub thumbnail: Option<Url>,

    /// Whether the backend is willing to stream this item.
    pub streamable: bool,
}

impl Candidate {
    /// Query to find this item on another backend.
    #[must_use]
    pub fn search_terms(&self) -> String {
        match &self.artist {
            Some(artist) if !artist.is_empty() => format!("{artist} {}", self.title),
            _ => self.title.clone(),
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn role(&self) -> Role;

    /// Whether `url` points into this backend.
    fn matches(&self, url: &Url) -> bool;

    /// Free-text search, best match first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Candidate>>;

    /// Metadata for a canonical URL.
    async fn fetch(&self, url: &Url) -> Result<Candidate>;

    /// Search terms spelled out by a permalink, to look for the item
    /// elsewhere when this backend does not know it. URLs made of opaque ids
    /// have none.
    fn permalink_terms(&self, _url: &Url) -> Option<String> {
        None
    }

    /// Resolves a canonical URL into something a renderer can play.
    async fn stream(&self, url: &Url) -> Result<StreamHandle> {
        Err(Error::unimplemented(format!(
            "{} does not stream {url}",
            self.kind()
        )))
    }
}

/// Whether `host` is `domain` or one of its subdomains.
pub(crate) fn host_matches(url: &Url, domains: &[&str]) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    domains.iter().any(|domain| {
        host == *domain
            || host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Words of a URL's path, split on dashes and underscores.
#[must_use]
pub fn slug_terms(url: &Url) -> Option<String> {
    let terms = url
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .flat_map(|segment| segment.split(['-', '_']))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Some(terms).filter(|terms| !terms.is_empty())
}
