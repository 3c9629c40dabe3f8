//! Human-readable titles for YouTube and Spotify embeds.
//!
//! Rendering never waits on the network: [`TitleResolver::title_for`] answers
//! from the cache or returns a provisional title and starts at most one
//! background fetch per key. Finished fetches are announced on a broadcast
//! channel unless the key was forgotten in the meantime.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use lru::LruCache;
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

use crate::domain::blocks::{MediaEmbed, MediaKind};
use crate::util::lock::mutex_guard;

pub(crate) const METRIC_TITLE_FETCH: &str = "blotter_title_fetch_total";

const OWNER: &str = "application::titles::TitleResolver";
const UPDATE_CHANNEL_CAPACITY: usize = 64;
const YOUTUBE_OEMBED: &str = "https://www.youtube.com/oembed";
const SPOTIFY_OEMBED: &str = "https://open.spotify.com/oembed";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TitleKey {
    pub service: TitleService,
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleService {
    Youtube,
    Spotify,
}

impl TitleKey {
    pub fn youtube(id: impl Into<String>) -> Self {
        Self {
            service: TitleService::Youtube,
            id: id.into(),
        }
    }

    /// `path` is `<kind>/<id>`, e.g. `track/4uLU6hMCjMI75M1A2tKUQC`.
    pub fn spotify(path: impl Into<String>) -> Self {
        Self {
            service: TitleService::Spotify,
            id: path.into(),
        }
    }

    pub fn for_embed(embed: &MediaEmbed) -> Option<Self> {
        match embed.kind {
            MediaKind::Youtube => Some(Self::youtube(embed.reference.clone())),
            MediaKind::Spotify => Some(Self::spotify(embed.reference.clone())),
            _ => None,
        }
    }

    /// Title shown until the real one arrives.
    pub fn provisional(&self) -> String {
        match self.service {
            TitleService::Youtube => "YouTube video".to_string(),
            TitleService::Spotify => {
                let kind = self.id.split('/').next().unwrap_or("track");
                format!("Spotify {kind}")
            }
        }
    }

    pub fn canonical_url(&self) -> String {
        match self.service {
            TitleService::Youtube => format!("https://www.youtube.com/watch?v={}", self.id),
            TitleService::Spotify => format!("https://open.spotify.com/{}", self.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "title", rename_all = "snake_case")]
pub enum TitleState {
    Ready(String),
    Pending(String),
}

impl TitleState {
    pub fn title(&self) -> &str {
        match self {
            TitleState::Ready(title) | TitleState::Pending(title) => title,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, TitleState::Ready(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleUpdate {
    pub key: TitleKey,
    pub title: String,
}

#[derive(Debug, Error)]
pub enum TitleFetchError {
    #[error("title request failed: {0}")]
    Http(String),
    #[error("title endpoint answered with status {0}")]
    Status(u16),
    #[error("title endpoint returned no title")]
    Missing,
    #[error("invalid title endpoint url: {0}")]
    Url(#[from] url::ParseError),
}

#[async_trait]
pub trait TitleSource: Send + Sync {
    async fn fetch_title(&self, key: &TitleKey) -> Result<String, TitleFetchError>;
}

#[derive(Debug, Deserialize)]
struct OEmbedResponse {
    title: Option<String>,
}

/// Fetches titles from the public oEmbed endpoints.
pub struct OEmbedTitleSource {
    client: reqwest::Client,
}

impl OEmbedTitleSource {
    pub fn new(timeout: Duration) -> Result<Self, TitleFetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TitleFetchError::Http(err.to_string()))?;
        Ok(Self { client })
    }

    fn endpoint(key: &TitleKey) -> Result<Url, TitleFetchError> {
        let target = key.canonical_url();
        let url = match key.service {
            TitleService::Youtube => Url::parse_with_params(
                YOUTUBE_OEMBED,
                &[("url", target.as_str()), ("format", "json")],
            )?,
            TitleService::Spotify => {
                Url::parse_with_params(SPOTIFY_OEMBED, &[("url", target.as_str())])?
            }
        };
        Ok(url)
    }
}

#[async_trait]
impl TitleSource for OEmbedTitleSource {
    async fn fetch_title(&self, key: &TitleKey) -> Result<String, TitleFetchError> {
        let response = self
            .client
            .get(Self::endpoint(key)?)
            .send()
            .await
            .map_err(|err| TitleFetchError::Http(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TitleFetchError::Status(status.as_u16()));
        }

        let body: OEmbedResponse = response
            .json()
            .await
            .map_err(|err| TitleFetchError::Http(err.to_string()))?;

        body.title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
            .ok_or(TitleFetchError::Missing)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TitleConfig {
    pub enabled: bool,
    pub cache_capacity: NonZeroUsize,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_capacity: NonZeroUsize::new(512).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

struct Inner {
    source: Arc<dyn TitleSource>,
    enabled: bool,
    cache: Mutex<LruCache<TitleKey, String>>,
    /// Keys whose result is still wanted; `forget` removes them.
    wanted: DashMap<TitleKey, ()>,
    in_flight: DashMap<TitleKey, ()>,
    updates: broadcast::Sender<TitleUpdate>,
}

#[derive(Clone)]
pub struct TitleResolver {
    inner: Arc<Inner>,
}

impl TitleResolver {
    pub fn new(source: Arc<dyn TitleSource>, config: TitleConfig) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                source,
                enabled: config.enabled,
                cache: Mutex::new(LruCache::new(config.cache_capacity)),
                wanted: DashMap::new(),
                in_flight: DashMap::new(),
                updates,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TitleUpdate> {
        self.inner.updates.subscribe()
    }

    pub fn cached(&self, key: &TitleKey) -> Option<String> {
        mutex_guard(&self.inner.cache, OWNER, "cached").get(key).cloned()
    }

    /// Answer immediately; start a background fetch on a miss.
    pub fn title_for(&self, key: &TitleKey) -> TitleState {
        if let Some(title) = self.cached(key) {
            return TitleState::Ready(title);
        }
        if self.inner.enabled {
            self.inner.wanted.insert(key.clone(), ());
            self.spawn_fetch(key);
        }
        TitleState::Pending(key.provisional())
    }

    /// Drop interest in `key`; a fetch still running is ignored on arrival.
    pub fn forget(&self, key: &TitleKey) {
        self.inner.wanted.remove(key);
    }

    /// Wait up to `timeout` for the titles of `keys`, returning what arrived.
    pub async fn settle(&self, keys: &[TitleKey], timeout: Duration) -> BTreeMap<TitleKey, String> {
        let mut updates = self.subscribe();
        let mut resolved = BTreeMap::new();
        for key in keys {
            if let TitleState::Ready(title) = self.title_for(key) {
                resolved.insert(key.clone(), title);
            }
        }

        let wait = async {
            while resolved.len() < keys.len() {
                match updates.recv().await {
                    Ok(update) if keys.contains(&update.key) => {
                        resolved.insert(update.key, update.title);
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        if tokio::time::timeout(timeout, wait).await.is_err() {
            debug!(
                target = "application::titles",
                pending = keys.len() - resolved.len(),
                "Stopped waiting for titles"
            );
        }
        resolved
    }

    fn spawn_fetch(&self, key: &TitleKey) {
        use dashmap::mapref::entry::Entry;

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(
                target = "application::titles",
                key = ?key,
                "No async runtime; keeping provisional title"
            );
            return;
        };

        match self.inner.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(vacant) => {
                vacant.insert(());
            }
        }

        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        handle.spawn(async move {
            let result = inner.source.fetch_title(&key).await;
            inner.in_flight.remove(&key);

            match result {
                Ok(title) => {
                    if inner.wanted.remove(&key).is_none() {
                        counter!(METRIC_TITLE_FETCH, "outcome" => "dropped").increment(1);
                        debug!(
                            target = "application::titles",
                            key = ?key,
                            "Discarding title for forgotten key"
                        );
                        return;
                    }
                    counter!(METRIC_TITLE_FETCH, "outcome" => "ok").increment(1);
                    mutex_guard(&inner.cache, OWNER, "store").put(key.clone(), title.clone());
                    if inner.updates.send(TitleUpdate { key, title }).is_err() {
                        debug!(target = "application::titles", "No title subscribers");
                    }
                }
                Err(err) => {
                    inner.wanted.remove(&key);
                    counter!(METRIC_TITLE_FETCH, "outcome" => "error").increment(1);
                    warn!(
                        target = "application::titles",
                        key = ?key,
                        error = %err,
                        "Title fetch failed; keeping provisional title"
                    );
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::Notify;

    use super::*;

    struct CountingSource {
        calls: AtomicUsize,
        gate: Notify,
    }

    #[async_trait]
    impl TitleSource for CountingSource {
        async fn fetch_title(&self, key: &TitleKey) -> Result<String, TitleFetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(format!("Title of {}", key.id))
        }
    }

    fn resolver() -> (TitleResolver, Arc<CountingSource>) {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            gate: Notify::new(),
        });
        let resolver = TitleResolver::new(source.clone(), TitleConfig::default());
        (resolver, source)
    }

    #[tokio::test]
    async fn pending_titles_resolve_in_place() {
        let (resolver, source) = resolver();
        let key = TitleKey::youtube("dQw4w9WgXcQ");
        let mut updates = resolver.subscribe();

        assert_eq!(
            resolver.title_for(&key),
            TitleState::Pending("YouTube video".into())
        );
        assert!(!resolver.title_for(&key).is_ready());
        tokio::task::yield_now().await;
        source.gate.notify_one();

        let update = updates.recv().await.expect("update");
        assert_eq!(update.title, "Title of dQw4w9WgXcQ");
        assert_eq!(
            resolver.title_for(&key),
            TitleState::Ready("Title of dQw4w9WgXcQ".into())
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn forgotten_keys_are_ignored_on_arrival() {
        let (resolver, source) = resolver();
        let key = TitleKey::spotify("track/abc");

        assert_eq!(resolver.title_for(&key).title(), "Spotify track");
        resolver.forget(&key);
        tokio::task::yield_now().await;
        source.gate.notify_one();

        for _ in 0..50 {
            if resolver.inner.in_flight.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(resolver.inner.in_flight.is_empty());
        assert_eq!(resolver.cached(&key), None);
    }

    #[test]
    fn without_runtime_titles_stay_provisional() {
        let (resolver, source) = resolver();
        let key = TitleKey::youtube("abc");
        assert_eq!(resolver.title_for(&key).title(), "YouTube video");
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn oembed_endpoint_encodes_target_url() {
        let url = OEmbedTitleSource::endpoint(&TitleKey::youtube("dQw4w9WgXcQ")).expect("url");
        assert_eq!(url.host_str(), Some("www.youtube.com"));
        assert!(
            url.as_str()
                .contains("url=https%3A%2F%2Fwww.youtube.com%2Fwatch%3Fv%3DdQw4w9WgXcQ")
        );
    }
}
