//! The record-store seam the pipeline talks through.

use kbforge_shared::{ArticleRecord, IncidentContext, IncidentId, NewArticle, Result};
use kbforge_storage::Storage;

/// Narrow view of the record store: one read per entity the pipeline
/// needs and one insert per record it creates.
#[allow(async_fn_in_trait)]
pub trait RecordStore {
    /// Keyed incident lookup. `Ok(None)` when no such incident exists.
    async fn find_incident(&self, id: &IncidentId) -> Result<Option<IncidentContext>>;

    /// Id of the first knowledge-base container whose title contains `fragment`.
    async fn find_knowledge_base(&self, fragment: &str) -> Result<Option<String>>;

    /// Insert one article; the store assigns its identifier.
    async fn insert_article(&self, article: &NewArticle) -> Result<ArticleRecord>;

    /// Insert one relationship record; returns its identifier.
    async fn insert_relationship(
        &self,
        parent_id: &str,
        child_id: &str,
        kind: &str,
    ) -> Result<String>;
}

impl RecordStore for Storage {
    async fn find_incident(&self, id: &IncidentId) -> Result<Option<IncidentContext>> {
        self.get_incident(id.as_str()).await
    }

    async fn find_knowledge_base(&self, fragment: &str) -> Result<Option<String>> {
        Ok(self
            .find_knowledge_base_by_title(fragment)
            .await?
            .map(|kb| kb.id))
    }

    async fn insert_article(&self, article: &NewArticle) -> Result<ArticleRecord> {
        Storage::insert_article(self, article).await
    }

    async fn insert_relationship(
        &self,
        parent_id: &str,
        child_id: &str,
        kind: &str,
    ) -> Result<String> {
        Storage::insert_relationship(self, parent_id, child_id, kind).await
    }
}
