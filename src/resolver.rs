//! Turns user queries into playable tracks.
//!
//! A query is either a URL that one backend claims, or free text searched on
//! the primary backend. Lookups go through the cache buckets first; backend
//! calls are bounded by a timeout and fall over to the other streamable
//! backends:
//!
//! * a backend that is down, throttled or too slow is retried elsewhere with
//!   its label appended to the query, as a hint towards re-uploads;
//! * a backend that merely has no (streamable) result is retried elsewhere
//!   with the plain query.
//!
//! Catalog URLs are resolved to their metadata, which is then searched on
//! the primary backend; the track keeps the catalog's display metadata but
//! streams from the primary backend.
//!
//! Resolution never fails with an error: when every backend gives up, the
//! result is `None`.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::Instant;
use url::Url;

use crate::{
    backend::{Backend, BackendKind, Candidate, Role},
    cache::{Caches, Key},
    error::{Error, ErrorKind, Result},
    track::{StreamHandle, Track},
};

/// How a query is going to be resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Query {
    Search(String),
    Url { backend: BackendKind, url: Url },
}

/// Why a backend did not produce a candidate.
#[derive(Debug)]
enum Miss {
    Empty,
    Failed(Error),
}

pub struct Resolver {
    backends: Vec<Arc<dyn Backend>>,
    caches: Arc<Caches>,
    timeout: Duration,
}

impl Resolver {
    /// Number of search results requested per backend call.
    const SEARCH_LIMIT: usize = 5;

    #[must_use]
    pub fn new(backends: Vec<Arc<dyn Backend>>, caches: Arc<Caches>, timeout: Duration) -> Self {
        if !backends.iter().any(|backend| backend.role() == Role::Primary) {
            warn!("no primary backend configured: searches will not resolve");
        }

        Self {
            backends,
            caches,
            timeout,
        }
    }

    #[must_use]
    pub fn caches(&self) -> &Arc<Caches> {
        &self.caches
    }

    fn backend(&self, kind: BackendKind) -> Option<&Arc<dyn Backend>> {
        self.backends.iter().find(|backend| backend.kind() == kind)
    }

    fn primary(&self) -> Option<&Arc<dyn Backend>> {
        self.backends
            .iter()
            .find(|backend| backend.role() == Role::Primary)
    }

    /// Streamable backends to try after `failed`, primary first.
    fn alternates(&self, failed: BackendKind) -> impl Iterator<Item = &Arc<dyn Backend>> {
        let primary = self
            .primary()
            .into_iter()
            .filter(move |backend| backend.kind() != failed);
        let secondaries = self
            .backends
            .iter()
            .filter(move |backend| backend.role() == Role::Secondary && backend.kind() != failed);
        primary.chain(secondaries)
    }

    async fn bounded<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.timeout, future).await?
    }

    /// Classifies a raw query. URLs no backend claims are searched as text.
    #[must_use]
    pub fn classify(&self, query: &str) -> Query {
        let query = query.trim();
        if let Ok(url) = Url::parse(query) {
            if let Some(backend) = self.backends.iter().find(|backend| backend.matches(&url)) {
                return Query::Url {
                    backend: backend.kind(),
                    url,
                };
            }
        }

        Query::Search(query.to_owned())
    }

    /// Resolves a query into a track requested by `requester`.
    pub async fn resolve(&self, query: &str, requester: &str) -> Option<Track> {
        let track = match self.classify(query) {
            Query::Search(terms) if terms.is_empty() => None,
            Query::Search(terms) => match self.primary() {
                Some(primary) => self.search_with_fallback(primary, &terms, requester).await,
                None => None,
            },
            Query::Url { backend, url } => {
                let backend = self.backend(backend)?;
                if backend.role() == Role::Catalog {
                    self.resolve_catalog(backend, &url, requester).await
                } else {
                    self.fetch_with_fallback(backend, &url, requester).await
                }
            }
        };

        match track {
            Some(ref track) => debug!("resolved \"{query}\" to {track}"),
            None => info!("could not resolve \"{query}\""),
        }
        track
    }

    async fn search_cached(
        &self,
        backend: &Arc<dyn Backend>,
        query: &str,
    ) -> std::result::Result<Candidate, Miss> {
        let key = Key::search(backend.kind(), query);
        let producer = move || async move {
            let results = self.bounded(backend.search(query, Self::SEARCH_LIMIT)).await?;
            Ok(results.into_iter().find(|candidate| candidate.streamable))
        };

        match self.caches.search.get_or_set(key, producer, None).await {
            Ok(Some(candidate)) => Ok(candidate),
            Ok(None) => Err(Miss::Empty),
            Err(e) => Err(Miss::Failed(e)),
        }
    }

    async fn fetch_cached(&self, backend: &Arc<dyn Backend>, url: &Url) -> Result<Candidate> {
        let key = Key::url(backend.kind(), url.as_str());
        let bucket = if backend.role() == Role::Catalog {
            &self.caches.metadata
        } else {
            &self.caches.urls
        };

        let producer = move || async move { self.bounded(backend.fetch(url)).await.map(Some) };
        bucket
            .get_or_set(key, producer, None)
            .await?
            .ok_or_else(|| Error::not_found(format!("{url} returned nothing")))
    }

    /// Searches `first`, then every alternate until one has a result.
    async fn search_with_fallback(
        &self,
        first: &Arc<dyn Backend>,
        query: &str,
        requester: &str,
    ) -> Option<Track> {
        let miss = match self.search_cached(first, query).await {
            Ok(candidate) => return Some(Track::new(candidate, first.kind(), requester)),
            Err(miss) => miss,
        };

        self.fall_back(first.kind(), query, &miss, requester).await
    }

    async fn fall_back(
        &self,
        failed: BackendKind,
        query: &str,
        miss: &Miss,
        requester: &str,
    ) -> Option<Track> {
        let (query, label) = match miss {
            Miss::Failed(e) if e.kind.is_transient() => {
                warn!("{failed} unavailable for \"{query}\": {e}");
                (format!("{query} {}", failed.label()), "unavailable")
            }
            Miss::Failed(e) => {
                debug!("{failed} failed for \"{query}\": {e}");
                (query.to_owned(), "fallback")
            }
            Miss::Empty => {
                debug!("{failed} has no result for \"{query}\"");
                (query.to_owned(), "fallback")
            }
        };

        for alternate in self.alternates(failed) {
            match self.search_cached(alternate, &query).await {
                Ok(candidate) => {
                    let label = format!("{} ({failed} {label})", alternate.kind());
                    return Some(Track::new(candidate, alternate.kind(), requester).with_label(label));
                }
                Err(Miss::Failed(e)) => warn!("{} failed for \"{query}\": {e}", alternate.kind()),
                Err(Miss::Empty) => debug!("{} has no result for \"{query}\"", alternate.kind()),
            }
        }

        None
    }

    async fn fetch_with_fallback(
        &self,
        backend: &Arc<dyn Backend>,
        url: &Url,
        requester: &str,
    ) -> Option<Track> {
        let miss = match self.fetch_cached(backend, url).await {
            Ok(candidate) if candidate.streamable => {
                return Some(Track::new(candidate, backend.kind(), requester));
            }
            Ok(candidate) => {
                info!("{url} is not streamable, searching elsewhere");
                return self
                    .fall_back(backend.kind(), &candidate.search_terms(), &Miss::Empty, requester)
                    .await;
            }
            Err(e) if e.kind == ErrorKind::NotFound => Miss::Empty,
            Err(e) => Miss::Failed(e),
        };

        let Some(terms) = backend.permalink_terms(url) else {
            debug!("{url} has no search terms to fall back on");
            return None;
        };
        self.fall_back(backend.kind(), &terms, &miss, requester).await
    }

    async fn resolve_catalog(
        &self,
        catalog: &Arc<dyn Backend>,
        url: &Url,
        requester: &str,
    ) -> Option<Track> {
        let metadata = match self.fetch_cached(catalog, url).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("{} could not fetch {url}: {e}", catalog.kind());
                return None;
            }
        };

        let primary = self.primary()?;
        let found = self
            .search_with_fallback(primary, &metadata.search_terms(), requester)
            .await?;

        let candidate = Candidate {
            url: found.url().clone(),
            streamable: true,
            ..metadata
        };
        let label = format!("{} → {}", catalog.kind(), found.backend());
        Some(Track::new(candidate, found.backend(), requester).with_label(label))
    }

    /// Acquires a stream handle for `track` and attaches it.
    ///
    /// Tries, in order: the track's own fresh handle, the stream cache, and
    /// the track's backend. When a secondary backend fails the track is
    /// silently moved onto the primary backend.
    ///
    /// # Errors
    ///
    /// Returns the last backend error when no handle could be acquired.
    pub async fn acquire(&self, track: &mut Track) -> Result<StreamHandle> {
        if let Some(handle) = track.fresh_stream() {
            trace!("using attached stream of {track}");
            return Ok(handle.clone());
        }

        match self.stream(track).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                let secondary = self
                    .backend(track.backend())
                    .is_some_and(|backend| backend.role() == Role::Secondary);
                if secondary {
                    self.substitute(track, e).await
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn stream(&self, track: &mut Track) -> Result<StreamHandle> {
        let key = track.url().to_string();
        if let Some(handle) = self.caches.streams.get(&key).filter(StreamHandle::is_fresh) {
            trace!("stream cache hit for {track}");
            track.attach(handle.clone());
            return Ok(handle);
        }

        let backend = self
            .backend(track.backend())
            .ok_or_else(|| Error::unavailable(format!("{} is not configured", track.backend())))?;
        let handle = self.bounded(backend.stream(track.url())).await?;

        if let Some(expires_at) = handle.expires_at() {
            let ttl = expires_at
                .saturating_duration_since(Instant::now())
                .saturating_sub(StreamHandle::EXPIRY_MARGIN)
                .min(self.caches.streams.ttl());
            if !ttl.is_zero() {
                self.caches.streams.set_with_ttl(key, handle.clone(), ttl);
            }
        } else {
            self.caches.streams.set(key, handle.clone());
        }

        track.attach(handle.clone());
        Ok(handle)
    }

    async fn substitute(&self, track: &mut Track, error: Error) -> Result<StreamHandle> {
        let failed = track.backend();
        let Some(primary) = self.primary().cloned() else {
            return Err(error);
        };

        info!("{failed} could not stream {track}: {error}; trying {}", primary.kind());
        let query = match track.artist() {
            Some(artist) => format!("{artist} {}", track.title()),
            None => track.title().to_owned(),
        };

        let candidate = self.search_cached(&primary, &query).await.map_err(|miss| match miss {
            Miss::Failed(e) => e,
            Miss::Empty => error,
        })?;

        track.substitute(
            primary.kind(),
            candidate.url,
            format!("{} ({failed} fallback)", primary.kind()),
        );
        self.stream(track).await
    }
}
