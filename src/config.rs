//! Runtime configuration.
//!
//! Configuration is static: it is read once at startup from a TOML file and
//! shared by reference afterwards. Every field has a default, so an empty
//! file (or no file at all) yields a working configuration.
//!
//! # Example
//!
//! ```toml
//! max_history = 20
//! advance_debounce = 500
//!
//! [cache.search]
//! ttl = 600
//! max_size = 250
//!
//! [spotify]
//! client_id = "..."
//! client_secret = "..."
//! ```

use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use url::Url;
use veil::Redact;

use crate::error::{Error, Result};

/// A credential that must never end up in logs.
#[derive(Clone, PartialEq, Eq, Deserialize, Redact)]
#[redact(all)]
pub struct Secret(pub String);

impl Secret {
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

/// Capacity and lifetime of one cache bucket.
#[serde_as]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct BucketConfig {
    /// Time to live of entries, in seconds.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub ttl: Duration,

    /// Maximum number of live entries.
    pub max_size: usize,
}

impl BucketConfig {
    #[must_use]
    pub const fn new(ttl: Duration, max_size: usize) -> Self {
        Self { ttl, max_size }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Free-text search results.
    pub search: BucketConfig,

    /// Canonical URL lookups.
    pub urls: BucketConfig,

    /// Catalog metadata.
    pub metadata: BucketConfig,

    /// Resolved stream handles.
    pub streams: BucketConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            search: BucketConfig::new(Duration::from_secs(15 * 60), 1000),
            urls: BucketConfig::new(Duration::from_secs(30 * 60), 500),
            metadata: BucketConfig::new(Duration::from_secs(60 * 60), 2000),
            streams: BucketConfig::new(Duration::from_secs(30 * 60), 500),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct YouTubeConfig {
    /// Base URL of an Invidious-compatible API instance.
    pub api_url: Url,
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            api_url: Url::parse("https://invidious.nerdvpn.de/")
                .unwrap_or_else(|_| unreachable!("static url is valid")),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SoundCloudConfig {
    /// API v2 client id. The backend is disabled without one.
    pub client_id: Option<Secret>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub client_id: Option<Secret>,
    pub client_secret: Option<Secret>,
}

impl SpotifyConfig {
    /// Client credentials, if both halves are configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&Secret, &Secret)> {
        self.client_id.as_ref().zip(self.client_secret.as_ref())
    }
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,

    /// Interval between lifecycle sweeps, in seconds.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub sweep_interval: Duration,

    /// Number of played tracks remembered per channel.
    pub max_history: usize,

    /// Delay between the end of a stream and advancing, in milliseconds.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub advance_debounce: Duration,

    /// Volume of a new queue as a ratio in `[0, 1]`.
    pub default_volume: f64,

    /// Upper bound on every backend call, in seconds.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub backend_timeout: Duration,

    pub youtube: YouTubeConfig,
    pub soundcloud: SoundCloudConfig,
    pub spotify: SpotifyConfig,

    /// Overrides the generated `User-Agent`.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            sweep_interval: Duration::from_secs(5 * 60),
            max_history: 10,
            advance_debounce: Duration::from_millis(1000),
            default_volume: 0.5,
            backend_timeout: Duration::from_secs(10),
            youtube: YouTubeConfig::default(),
            soundcloud: SoundCloudConfig::default(),
            spotify: SpotifyConfig::default(),
            user_agent: Self::default_user_agent(),
        }
    }
}

impl Config {
    /// Maximum size of a configuration file, to prevent reading a huge file
    /// into memory by accident.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    /// Reads and validates the configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is too large, does not
    /// parse or does not validate.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let size = fs::metadata(path)?.len();
        if size > Self::MAX_FILE_SIZE {
            return Err(Error::out_of_range(format!(
                "{} is too large ({size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        contents.parse()
    }

    /// Checks that every value is within bounds.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.default_volume) {
            return Err(Error::invalid_argument(format!(
                "default_volume must be within [0, 1], got {}",
                self.default_volume
            )));
        }

        for (name, bucket) in [
            ("search", self.cache.search),
            ("urls", self.cache.urls),
            ("metadata", self.cache.metadata),
            ("streams", self.cache.streams),
        ] {
            if bucket.max_size == 0 || bucket.ttl.is_zero() {
                return Err(Error::invalid_argument(format!(
                    "cache.{name} needs a non-zero ttl and max_size"
                )));
            }
        }

        if self.sweep_interval.is_zero() {
            return Err(Error::invalid_argument("sweep_interval must be non-zero"));
        }

        if self.backend_timeout.is_zero() {
            return Err(Error::invalid_argument("backend_timeout must be non-zero"));
        }

        if self.user_agent.is_empty() {
            return Err(Error::invalid_argument("user_agent must not be empty"));
        }

        Ok(())
    }

    /// Builds a `User-Agent` in the style of desktop clients:
    /// `name/version (Rust; os/version; Desktop; en)`.
    #[must_use]
    pub fn default_user_agent() -> String {
        let app_name = env!("CARGO_PKG_NAME");
        let app_version = env!("CARGO_PKG_VERSION");

        let illegal_chars = |chr| chr == '/' || chr == ';';
        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version()
            .filter(|version| !version.is_empty() && !version.contains(illegal_chars))
            .unwrap_or_else(|| String::from("0"));

        format!("{app_name}/{app_version} (Rust; {os_name}/{os_version}; Desktop; en)")
    }
}

impl std::str::FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        trace!("user agent: {}", config.user_agent);
        Ok(config)
    }
}
