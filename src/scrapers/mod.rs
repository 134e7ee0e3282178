//! Provider adapters and their registry.
//!
//! Concrete scrapers live behind the [`Scraper`] trait; everything above
//! this module (search pipeline, import engine) only sees the trait. The
//! registry also owns the process-wide search lock serializing expensive
//! search fan-outs across all API entry points.

pub mod custom;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::media::{MediaType, ProviderEpisodeInfo, ProviderSearchInfo};
use crate::models::danmaku::Comment;

/// Season/episode hints forwarded to provider searches.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpisodeSearchHint {
    pub season: Option<i32>,
    pub episode: Option<i32>,
}

/// Progress sink handed into long downloads. Implementations forward to the
/// running task's progress channel.
pub type ProgressSink = dyn Fn(u32, &str) + Send + Sync;

#[async_trait]
pub trait Scraper: Send + Sync {
    /// Stable name; doubles as the rate-limit bucket key.
    fn provider_name(&self) -> &'static str;

    /// Per-window request quota, `None` meaning unlimited.
    fn rate_limit_quota(&self) -> Option<i32> {
        None
    }

    /// Search all given titles, returning an ordered candidate list. An
    /// empty result is not an error.
    async fn search(
        &self,
        titles: &[String],
        hint: EpisodeSearchHint,
    ) -> anyhow::Result<Vec<ProviderSearchInfo>>;

    /// Ordered episode descriptors for a media id. May return fewer items
    /// when `target_episode` is set.
    async fn get_episodes(
        &self,
        media_id: &str,
        target_episode: Option<i32>,
        db_media_type: Option<MediaType>,
    ) -> anyhow::Result<Vec<ProviderEpisodeInfo>>;

    /// Full comment list for one episode, or `None` on hard failure.
    /// Never returns a partial list.
    async fn get_comments(
        &self,
        episode_id: &str,
        progress: Option<&ProgressSink>,
    ) -> anyhow::Result<Option<Vec<Comment>>>;

    /// Resolve a share/watch URL into a candidate (URL-import flow).
    async fn get_info_from_url(&self, _url: &str) -> anyhow::Result<Option<ProviderSearchInfo>> {
        Ok(None)
    }

    /// Extract a provider episode id from a URL (supplemental-URL flow).
    async fn get_id_from_url(&self, _url: &str) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// Who currently holds the search lock. Typed so a release can be checked
/// against the matching acquire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockHolder {
    Task(String),
    ApiToken(String),
    SchedulerJob(String),
}

impl std::fmt::Display for LockHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Task(id) => write!(f, "task:{id}"),
            Self::ApiToken(id) => write!(f, "api:{id}"),
            Self::SchedulerJob(id) => write!(f, "scheduler:{id}"),
        }
    }
}

#[derive(Default)]
struct LockState {
    holder: Option<LockHolder>,
}

pub struct ScraperRegistry {
    scrapers: HashMap<&'static str, Arc<dyn Scraper>>,
    search_lock: Mutex<LockState>,
    /// Last observed single-provider search duration, for telemetry.
    timings: Mutex<HashMap<&'static str, Duration>>,
}

impl ScraperRegistry {
    #[must_use]
    pub fn new(scrapers: Vec<Arc<dyn Scraper>>) -> Self {
        let scrapers = scrapers
            .into_iter()
            .map(|s| (s.provider_name(), s))
            .collect();
        Self {
            scrapers,
            search_lock: Mutex::new(LockState::default()),
            timings: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, provider: &str) -> anyhow::Result<Arc<dyn Scraper>> {
        self.scrapers
            .get(provider)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown provider '{provider}'"))
    }

    #[must_use]
    pub fn provider_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.scrapers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn quota(&self, provider: &str) -> Option<i32> {
        self.scrapers
            .get(provider)
            .and_then(|s| s.rate_limit_quota())
            .filter(|&q| q > 0)
    }

    /// Non-reentrant: a holder that already owns the lock does not acquire
    /// it twice.
    pub fn acquire_search_lock(&self, holder: LockHolder) -> bool {
        let mut state = self.search_lock.lock().expect("search lock poisoned");
        if state.holder.is_some() {
            return false;
        }
        debug!("Search lock acquired by {}", holder);
        state.holder = Some(holder);
        true
    }

    /// Release only succeeds for the holder that acquired.
    pub fn release_search_lock(&self, holder: &LockHolder) -> bool {
        let mut state = self.search_lock.lock().expect("search lock poisoned");
        if state.holder.as_ref() == Some(holder) {
            state.holder = None;
            debug!("Search lock released by {}", holder);
            true
        } else {
            warn!(
                "Search lock release by {} did not match holder {:?}",
                holder, state.holder
            );
            false
        }
    }

    #[must_use]
    pub fn search_lock_holder(&self) -> Option<LockHolder> {
        self.search_lock
            .lock()
            .expect("search lock poisoned")
            .holder
            .clone()
    }

    pub fn record_search_timing(&self, provider: &'static str, elapsed: Duration) {
        self.timings
            .lock()
            .expect("timings lock poisoned")
            .insert(provider, elapsed);
    }

    #[must_use]
    pub fn search_timings(&self) -> HashMap<&'static str, Duration> {
        self.timings.lock().expect("timings lock poisoned").clone()
    }
}

/// Holds the search lock for a scope; release is guaranteed on every exit
/// path, including errors and aborts.
pub struct SearchLockGuard {
    registry: Arc<ScraperRegistry>,
    holder: LockHolder,
}

impl SearchLockGuard {
    /// `None` if another caller already holds the lock.
    #[must_use]
    pub fn try_acquire(registry: Arc<ScraperRegistry>, holder: LockHolder) -> Option<Self> {
        if registry.acquire_search_lock(holder.clone()) {
            Some(Self { registry, holder })
        } else {
            None
        }
    }
}

impl Drop for SearchLockGuard {
    fn drop(&mut self) {
        self.registry.release_search_lock(&self.holder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_lock_is_exclusive_and_holder_checked() {
        let registry = ScraperRegistry::new(vec![]);
        let a = LockHolder::Task("a".into());
        let b = LockHolder::ApiToken("b".into());

        assert!(registry.acquire_search_lock(a.clone()));
        assert!(!registry.acquire_search_lock(b.clone()));
        // Wrong holder cannot release.
        assert!(!registry.release_search_lock(&b));
        assert!(registry.release_search_lock(&a));
        assert!(registry.acquire_search_lock(b));
    }

    #[test]
    fn guard_releases_on_drop() {
        let registry = Arc::new(ScraperRegistry::new(vec![]));
        {
            let guard = SearchLockGuard::try_acquire(
                registry.clone(),
                LockHolder::SchedulerJob("drain".into()),
            );
            assert!(guard.is_some());
            assert!(registry.search_lock_holder().is_some());
        }
        assert!(registry.search_lock_holder().is_none());
    }
}
