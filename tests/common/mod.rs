#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

use jukebot::{
    backend::{self, Backend, BackendKind, Candidate, Role},
    cache::Caches,
    command::CommandContext,
    config::Config,
    error::{Error, ErrorKind, Result},
    events::Event,
    player::Player,
    resolver::Resolver,
    track::StreamHandle,
    voice::{ChannelId, Loopback},
};

/// Scriptable in-memory backend.
///
/// Unless told otherwise, every search finds exactly one track titled like
/// the query.
pub struct Mock {
    kind: BackendKind,
    role: Role,
    host: &'static str,
    echo: bool,
    results: Mutex<HashMap<String, Vec<Candidate>>>,
    items: Mutex<HashMap<Url, Candidate>>,
    search_error: Mutex<Option<ErrorKind>>,
    stream_error: Mutex<Option<ErrorKind>>,
    stream_delay: Mutex<Duration>,
    search_delay: Mutex<Duration>,
    queries: Mutex<Vec<String>>,
    streams: AtomicUsize,
}

impl Mock {
    pub fn new(kind: BackendKind, role: Role) -> Self {
        let host = match kind {
            BackendKind::YouTube => "youtube.test",
            BackendKind::SoundCloud => "soundcloud.test",
            BackendKind::Spotify => "spotify.test",
        };

        Self {
            kind,
            role,
            host,
            echo: true,
            results: Mutex::default(),
            items: Mutex::default(),
            search_error: Mutex::default(),
            stream_error: Mutex::default(),
            stream_delay: Mutex::new(Duration::ZERO),
            search_delay: Mutex::new(Duration::ZERO),
            queries: Mutex::default(),
            streams: AtomicUsize::new(0),
        }
    }

    pub fn youtube() -> Self {
        Self::new(BackendKind::YouTube, Role::Primary)
    }

    pub fn soundcloud() -> Self {
        Self::new(BackendKind::SoundCloud, Role::Secondary)
    }

    pub fn spotify() -> Self {
        Self::new(BackendKind::Spotify, Role::Catalog).silent()
    }

    /// Only finds what was registered with [`Mock::with_result`].
    pub fn silent(mut self) -> Self {
        self.echo = false;
        self
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("https://{}/{path}", self.host)).unwrap()
    }

    pub fn candidate(&self, title: &str) -> Candidate {
        Candidate {
            title: title.to_owned(),
            artist: None,
            url: self.url(&title.replace(' ', "-")),
            duration: Some(Duration::from_secs(180)),
            thumbnail: None,
            streamable: true,
        }
    }

    pub fn with_result(self, query: &str, candidates: Vec<Candidate>) -> Self {
        self.results
            .lock()
            .unwrap()
            .insert(query.to_owned(), candidates);
        self
    }

    pub fn with_item(self, candidate: Candidate) -> Self {
        self.items
            .lock()
            .unwrap()
            .insert(candidate.url.clone(), candidate);
        self
    }

    pub fn fail_searches(&self, kind: Option<ErrorKind>) {
        *self.search_error.lock().unwrap() = kind;
    }

    pub fn fail_streams(&self, kind: Option<ErrorKind>) {
        *self.stream_error.lock().unwrap() = kind;
    }

    pub fn delay_streams(&self, delay: Duration) {
        *self.stream_delay.lock().unwrap() = delay;
    }

    pub fn delay_searches(&self, delay: Duration) {
        *self.search_delay.lock().unwrap() = delay;
    }

    /// Queries searched so far, oldest first.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn stream_calls(&self) -> usize {
        self.streams.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for Mock {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn role(&self) -> Role {
        self.role
    }

    fn matches(&self, url: &Url) -> bool {
        url.host_str() == Some(self.host)
    }

    async fn search(&self, query: &str, _limit: usize) -> Result<Vec<Candidate>> {
        self.queries.lock().unwrap().push(query.to_owned());
        let delay = *self.search_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(kind) = *self.search_error.lock().unwrap() {
            return Err(Error::new(kind, format!("{} search failed", self.kind)));
        }

        let registered = self.results.lock().unwrap().get(query).cloned();
        Ok(match registered {
            Some(candidates) => candidates,
            None if self.echo => vec![self.candidate(query)],
            None => Vec::new(),
        })
    }

    fn permalink_terms(&self, url: &Url) -> Option<String> {
        (self.kind == BackendKind::SoundCloud)
            .then(|| backend::slug_terms(url))
            .flatten()
    }

    async fn fetch(&self, url: &Url) -> Result<Candidate> {
        let item = self.items.lock().unwrap().get(url).cloned();
        item.ok_or_else(|| Error::not_found(format!("{url} not found")))
    }

    async fn stream(&self, url: &Url) -> Result<StreamHandle> {
        self.streams.fetch_add(1, Ordering::SeqCst);
        let delay = *self.stream_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(kind) = *self.stream_error.lock().unwrap() {
            return Err(Error::new(kind, format!("{} cannot stream {url}", self.kind)));
        }

        let mut stream = url.clone();
        stream.set_path(&format!("stream{}", url.path()));
        Ok(StreamHandle::new(stream, None, Some(Duration::from_secs(3600))))
    }
}

/// A user issuing commands.
pub struct User {
    pub channel: Option<ChannelId>,
    pub name: String,
}

impl User {
    pub fn in_channel(channel: u64) -> Self {
        Self {
            channel: Some(ChannelId(channel)),
            name: format!("user{channel}"),
        }
    }

    pub fn outside() -> Self {
        Self {
            channel: None,
            name: "lurker".to_owned(),
        }
    }
}

impl CommandContext for User {
    fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    fn requester(&self) -> &str {
        &self.name
    }
}

pub fn resolver(backends: Vec<Arc<dyn Backend>>) -> Resolver {
    let config = Config::default();
    Resolver::new(
        backends,
        Arc::new(Caches::new(&config.cache)),
        config.backend_timeout,
    )
}

pub struct Harness {
    pub player: Player,
    pub loopback: Loopback,
    pub youtube: Arc<Mock>,
    pub events: UnboundedReceiver<Event>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_youtube(Mock::youtube())
    }

    pub fn with_youtube(youtube: Mock) -> Self {
        let youtube = Arc::new(youtube);
        let resolver = Arc::new(resolver(vec![youtube.clone() as Arc<dyn Backend>]));
        let loopback = Loopback::new();
        let (events_tx, events) = tokio::sync::mpsc::unbounded_channel();

        let (player, signals) = Player::new(
            Config::default(),
            resolver,
            Arc::new(loopback.clone()),
            Some(events_tx),
        );
        tokio::spawn(player.clone().run(signals));

        Self {
            player,
            loopback,
            youtube,
            events,
        }
    }

    /// Titles rendered into `channel`, in order.
    pub fn played(&self, channel: u64) -> Vec<String> {
        self.loopback
            .played(ChannelId(channel))
            .into_iter()
            .map(|played| played.title)
            .collect()
    }

    /// Titles of the current and the pending songs of `channel`.
    pub async fn queue(&self, channel: u64) -> Option<(Option<String>, Vec<String>)> {
        self.player
            .with_queue(ChannelId(channel), |queue| {
                (
                    queue.current().map(|track| track.title().to_owned()),
                    queue.songs().map(|track| track.title().to_owned()).collect(),
                )
            })
            .await
    }
}

/// Lets spawned tasks run, advancing the paused clock by `millis`.
pub async fn wait(millis: u64) {
    tokio::time::sleep(Duration::from_millis(millis)).await;
}
