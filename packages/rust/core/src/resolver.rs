//! Knowledge-base container resolution with an explicit cache.

use std::sync::Mutex;

use tracing::debug;

use kbforge_shared::{KnowledgeBaseConfig, Result};

use crate::store::RecordStore;

/// Resolves the default container a draft is filed under.
///
/// A configured id wins outright. Otherwise the first container whose title
/// contains the configured fragment is looked up once and cached until
/// [`invalidate`](Self::invalidate) is called. Failed lookups are not cached.
#[derive(Debug)]
pub struct KnowledgeBaseResolver {
    fixed_id: Option<String>,
    title_contains: String,
    cached: Mutex<Option<Option<String>>>,
}

impl KnowledgeBaseResolver {
    pub fn new(config: &KnowledgeBaseConfig) -> Self {
        Self {
            fixed_id: config.id.clone().filter(|id| !id.trim().is_empty()),
            title_contains: config.title_contains.clone(),
            cached: Mutex::new(None),
        }
    }

    /// Container id to file under, or `None` when nothing matches.
    pub async fn resolve_default<S: RecordStore>(&self, store: &S) -> Result<Option<String>> {
        if let Some(id) = &self.fixed_id {
            return Ok(Some(id.clone()));
        }

        if let Some(hit) = self.cache_slot().clone() {
            debug!(knowledge_base_id = ?hit, "knowledge base resolved from cache");
            return Ok(hit);
        }

        let found = store.find_knowledge_base(&self.title_contains).await?;
        debug!(
            title_contains = %self.title_contains,
            knowledge_base_id = ?found,
            "knowledge base looked up"
        );
        *self.cache_slot() = Some(found.clone());
        Ok(found)
    }

    /// Drop the cached lookup so the next resolve queries the store again.
    pub fn invalidate(&self) {
        *self.cache_slot() = None;
    }

    fn cache_slot(&self) -> std::sync::MutexGuard<'_, Option<Option<String>>> {
        // The guarded value is a plain cache; a poisoned lock is still usable.
        self.cached.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use kbforge_shared::{ArticleRecord, IncidentContext, IncidentId, KbForgeError, NewArticle};

    /// Store stub that only answers container lookups.
    struct CountingStore {
        answer: Option<String>,
        fail: bool,
        lookups: AtomicUsize,
    }

    impl CountingStore {
        fn new(answer: Option<&str>) -> Self {
            Self {
                answer: answer.map(String::from),
                fail: false,
                lookups: AtomicUsize::new(0),
            }
        }
    }

    impl RecordStore for CountingStore {
        async fn find_incident(&self, _id: &IncidentId) -> Result<Option<IncidentContext>> {
            Ok(None)
        }

        async fn find_knowledge_base(&self, _fragment: &str) -> Result<Option<String>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(KbForgeError::Storage("lookup failed".into()));
            }
            Ok(self.answer.clone())
        }

        async fn insert_article(&self, _article: &NewArticle) -> Result<ArticleRecord> {
            Err(KbForgeError::Storage("unsupported".into()))
        }

        async fn insert_relationship(&self, _p: &str, _c: &str, _k: &str) -> Result<String> {
            Err(KbForgeError::Storage("unsupported".into()))
        }
    }

    #[tokio::test]
    async fn lookup_is_cached_until_invalidated() {
        let store = CountingStore::new(Some("kb-it"));
        let resolver = KnowledgeBaseResolver::new(&KnowledgeBaseConfig::default());

        assert_eq!(resolver.resolve_default(&store).await.unwrap().as_deref(), Some("kb-it"));
        assert_eq!(resolver.resolve_default(&store).await.unwrap().as_deref(), Some("kb-it"));
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);

        resolver.invalidate();
        resolver.resolve_default(&store).await.unwrap();
        assert_eq!(store.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn absence_is_cached_too() {
        let store = CountingStore::new(None);
        let resolver = KnowledgeBaseResolver::new(&KnowledgeBaseConfig::default());

        assert!(resolver.resolve_default(&store).await.unwrap().is_none());
        assert!(resolver.resolve_default(&store).await.unwrap().is_none());
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fixed_id_skips_lookup() {
        let store = CountingStore::new(Some("kb-other"));
        let config = KnowledgeBaseConfig {
            id: Some("kb-fixed".into()),
            ..KnowledgeBaseConfig::default()
        };
        let resolver = KnowledgeBaseResolver::new(&config);

        assert_eq!(
            resolver.resolve_default(&store).await.unwrap().as_deref(),
            Some("kb-fixed")
        );
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_lookup_is_not_cached() {
        let mut store = CountingStore::new(Some("kb-it"));
        store.fail = true;
        let resolver = KnowledgeBaseResolver::new(&KnowledgeBaseConfig::default());

        assert!(resolver.resolve_default(&store).await.is_err());
        store.fail = false;
        assert_eq!(resolver.resolve_default(&store).await.unwrap().as_deref(), Some("kb-it"));
        assert_eq!(store.lookups.load(Ordering::SeqCst), 2);
    }
}
