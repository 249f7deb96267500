//! Store-facing pipeline stages: context loading, article writing, linking.
//!
//! Each stage turns store failures into the error kind the orchestrator
//! expects for that step.

use tracing::{debug, info};

use kbforge_shared::{
    ArticleId, ArticleRecord, IncidentContext, IncidentId, KbForgeError, NewArticle, Result,
};

use crate::store::RecordStore;

/// Load the incident snapshot. A missing incident is [`KbForgeError::NotFound`].
pub async fn load_context<S: RecordStore>(
    store: &S,
    incident_id: &IncidentId,
) -> Result<IncidentContext> {
    match store.find_incident(incident_id).await? {
        Some(context) => {
            debug!(%incident_id, number = %context.number, "incident loaded");
            Ok(context)
        }
        None => Err(KbForgeError::not_found(incident_id.as_str())),
    }
}

/// Insert one draft article. Any rejection is [`KbForgeError::Persistence`].
pub async fn create_article<S: RecordStore>(
    store: &S,
    article: &NewArticle,
) -> Result<ArticleRecord> {
    let record = store.insert_article(article).await.map_err(|e| match e {
        KbForgeError::Persistence(_) => e,
        other => KbForgeError::Persistence(other.to_string()),
    })?;

    info!(
        article_id = %record.id,
        number = %record.number,
        knowledge_base_id = ?article.knowledge_base_id,
        "draft article created"
    );
    Ok(record)
}

/// Link the article back to its incident. Any rejection is [`KbForgeError::Link`].
pub async fn link_article<S: RecordStore>(
    store: &S,
    incident_id: &IncidentId,
    article_id: &ArticleId,
    kind: &str,
) -> Result<String> {
    let child_id = article_id.to_string();
    let link_id = store
        .insert_relationship(incident_id.as_str(), &child_id, kind)
        .await
        .map_err(|e| match e {
            KbForgeError::Link(_) => e,
            other => KbForgeError::Link(other.to_string()),
        })?;

    debug!(%incident_id, %article_id, kind, link_id = %link_id, "relationship created");
    Ok(link_id)
}
