//! Read-through cache for the read-heavy views.
//!
//! Keys carry the user id so one tenant never reads another's entry. Only
//! `Some` results are cached; a miss always falls through to the stores.
//! A load that overlaps any invalidation is returned but not kept.

use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use super::{ArtifactBody, ArtifactSummary};
use crate::config::CacheConfig;
use crate::manuscript::{Manuscript, ManuscriptPage};
use crate::metrics::{CACHE_HITS, CACHE_MISSES};
use crate::service::AnalysisStatus;

type UserKey = (String, String);
type BodyKey = (String, String, String);

#[derive(Clone)]
pub struct ArtifactCache {
    manuscripts: Cache<UserKey, Manuscript>,
    analysis_status: Cache<UserKey, AnalysisStatus>,
    listings: Cache<(String, usize), ManuscriptPage>,
    artifact_lists: Cache<UserKey, Arc<Vec<ArtifactSummary>>>,
    artifact_bodies: Cache<BodyKey, Arc<ArtifactBody>>,
    /// Bumped before every invalidation.
    generation: Arc<AtomicU64>,
}

fn build<K, V>(capacity: u64, ttl_secs: u64) -> Cache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    Cache::builder()
        .max_capacity(capacity)
        .time_to_live(Duration::from_secs(ttl_secs))
        .support_invalidation_closures()
        .build()
}

async fn read_through<K, V, E, F>(
    cache: &Cache<K, V>,
    generation: &AtomicU64,
    view: &str,
    key: K,
    load: F,
) -> Result<Option<V>, E>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Future<Output = Result<Option<V>, E>>,
{
    if let Some(hit) = cache.get(&key).await {
        CACHE_HITS.with_label_values(&[view]).inc();
        return Ok(Some(hit));
    }
    CACHE_MISSES.with_label_values(&[view]).inc();

    let seen = generation.load(Ordering::SeqCst);
    let loaded = load.await?;
    if let Some(value) = &loaded {
        if generation.load(Ordering::SeqCst) != seen {
            tracing::debug!(view, "Invalidated during load; not caching");
            return Ok(loaded);
        }
        cache.insert(key.clone(), value.clone()).await;
        // An invalidation between the check and the insert may have run
        // before the entry existed.
        if generation.load(Ordering::SeqCst) != seen {
            cache.invalidate(&key).await;
        }
    }
    Ok(loaded)
}

fn key(user_id: &str, id: &str) -> UserKey {
    (user_id.to_string(), id.to_string())
}

impl ArtifactCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cap = config.max_capacity;
        let ttl = &config.ttl_secs;
        Self {
            manuscripts: build(cap, ttl.manuscript),
            analysis_status: build(cap, ttl.analysis_status),
            listings: build(cap, ttl.listing),
            artifact_lists: build(cap, ttl.listing),
            artifact_bodies: build(cap, ttl.manuscript),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn manuscript<E, F>(
        &self,
        user_id: &str,
        id: &str,
        load: F,
    ) -> Result<Option<Manuscript>, E>
    where
        F: Future<Output = Result<Option<Manuscript>, E>>,
    {
        read_through(
            &self.manuscripts,
            &self.generation,
            "manuscript",
            key(user_id, id),
            load,
        )
        .await
    }

    pub async fn analysis_status<E, F>(
        &self,
        user_id: &str,
        id: &str,
        load: F,
    ) -> Result<Option<AnalysisStatus>, E>
    where
        F: Future<Output = Result<Option<AnalysisStatus>, E>>,
    {
        read_through(
            &self.analysis_status,
            &self.generation,
            "analysis_status",
            key(user_id, id),
            load,
        )
        .await
    }

    /// First page of a user's manuscript list.
    pub async fn first_page<E, F>(
        &self,
        user_id: &str,
        limit: usize,
        load: F,
    ) -> Result<Option<ManuscriptPage>, E>
    where
        F: Future<Output = Result<Option<ManuscriptPage>, E>>,
    {
        read_through(
            &self.listings,
            &self.generation,
            "listing",
            (user_id.to_string(), limit),
            load,
        )
        .await
    }

    pub async fn artifact_list<E, F>(
        &self,
        user_id: &str,
        manuscript_id: &str,
        load: F,
    ) -> Result<Option<Arc<Vec<ArtifactSummary>>>, E>
    where
        F: Future<Output = Result<Option<Arc<Vec<ArtifactSummary>>>, E>>,
    {
        read_through(
            &self.artifact_lists,
            &self.generation,
            "artifact_list",
            key(user_id, manuscript_id),
            load,
        )
        .await
    }

    pub async fn artifact_body<E, F>(
        &self,
        user_id: &str,
        manuscript_id: &str,
        kind: &str,
        load: F,
    ) -> Result<Option<Arc<ArtifactBody>>, E>
    where
        F: Future<Output = Result<Option<Arc<ArtifactBody>>, E>>,
    {
        let body_key = (user_id.to_string(), manuscript_id.to_string(), kind.to_string());
        read_through(&self.artifact_bodies, &self.generation, "artifact", body_key, load).await
    }

    /// After a publish: the kind's body, the artifact list, the analysis
    /// summary and the owner's listing.
    pub async fn invalidate_artifact(&self, user_id: &str, manuscript_id: &str, kind: &str) {
        self.bump();
        self.artifact_bodies
            .invalidate(&(user_id.to_string(), manuscript_id.to_string(), kind.to_string()))
            .await;
        self.artifact_lists.invalidate(&key(user_id, manuscript_id)).await;
        self.invalidate_status(user_id, manuscript_id).await;
    }

    /// After a manuscript or job state change.
    pub async fn invalidate_status(&self, user_id: &str, manuscript_id: &str) {
        self.bump();
        self.manuscripts.invalidate(&key(user_id, manuscript_id)).await;
        self.analysis_status.invalidate(&key(user_id, manuscript_id)).await;
        self.invalidate_listing(user_id);
    }

    pub fn invalidate_listing(&self, user_id: &str) {
        self.bump();
        let owner = user_id.to_string();
        if let Err(e) = self.listings.invalidate_entries_if(move |k, _| k.0 == owner) {
            tracing::warn!(error = %e, "Failed to invalidate listing cache");
        }
    }

    /// Drop every entry for one manuscript.
    pub async fn invalidate_manuscript(&self, user_id: &str, manuscript_id: &str) {
        self.bump();
        let (owner, id) = key(user_id, manuscript_id);
        let predicate = move |k: &BodyKey, _: &Arc<ArtifactBody>| k.0 == owner && k.1 == id;
        if let Err(e) = self.artifact_bodies.invalidate_entries_if(predicate) {
            tracing::warn!(error = %e, "Failed to invalidate artifact cache");
        }
        self.artifact_lists.invalidate(&key(user_id, manuscript_id)).await;
        self.invalidate_status(user_id, manuscript_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    fn cache() -> ArtifactCache {
        ArtifactCache::new(&CacheConfig::default())
    }

    #[tokio::test]
    async fn test_read_through_caches_hits() {
        let cache = cache();
        let m = fixtures::manuscript("m1", "user-1", fixtures::base_time());

        let loaded: Result<_, ()> = cache
            .manuscript("user-1", "m1", async { Ok(Some(m.clone())) })
            .await;
        assert_eq!(loaded.unwrap().unwrap().id, "m1");

        // Second read must not call the loader.
        let cached: Result<_, ()> = cache
            .manuscript("user-1", "m1", async { panic!("loader called on a hit") })
            .await;
        assert!(cached.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_none_is_not_cached() {
        let cache = cache();
        let first: Result<Option<Manuscript>, ()> =
            cache.manuscript("user-1", "m1", async { Ok(None) }).await;
        assert!(first.unwrap().is_none());

        let m = fixtures::manuscript("m1", "user-1", fixtures::base_time());
        let second: Result<_, ()> = cache
            .manuscript("user-1", "m1", async { Ok(Some(m)) })
            .await;
        assert!(second.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_keys_are_per_user() {
        let cache = cache();
        let m = fixtures::manuscript("m1", "user-1", fixtures::base_time());
        let _: Result<_, ()> = cache
            .manuscript("user-1", "m1", async { Ok(Some(m)) })
            .await;

        let other: Result<Option<Manuscript>, ()> =
            cache.manuscript("user-2", "m1", async { Ok(None) }).await;
        assert!(other.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_overlapping_invalidation_is_not_kept() {
        let cache = cache();
        let stale = fixtures::manuscript("m1", "user-1", fixtures::base_time());

        let loaded: Result<_, ()> = cache
            .manuscript("user-1", "m1", async {
                // A state change lands while the old row is in flight.
                cache.invalidate_status("user-1", "m1").await;
                Ok(Some(stale.clone()))
            })
            .await;
        assert_eq!(loaded.unwrap().unwrap().title, "The Orchard");

        let mut current = stale.clone();
        current.title = "The Orchard (revised)".to_string();
        let fresh: Result<_, ()> = cache
            .manuscript("user-1", "m1", async { Ok(Some(current)) })
            .await;
        assert_eq!(fresh.unwrap().unwrap().title, "The Orchard (revised)");
    }

    #[tokio::test]
    async fn test_invalidate_status_drops_manuscript_entry() {
        let cache = cache();
        let m = fixtures::manuscript("m1", "user-1", fixtures::base_time());
        let _: Result<_, ()> = cache
            .manuscript("user-1", "m1", async { Ok(Some(m.clone())) })
            .await;

        cache.invalidate_status("user-1", "m1").await;

        let mut updated = m;
        updated.title = "Renamed".to_string();
        let fresh: Result<_, ()> = cache
            .manuscript("user-1", "m1", async { Ok(Some(updated)) })
            .await;
        assert_eq!(fresh.unwrap().unwrap().title, "Renamed");
    }
}
