//! End-to-end `generate` pipeline:
//! incident id → context → prompt → service reply → article text → draft → link.

use std::time::{Duration, Instant};

use tracing::{error, info, instrument, warn};

use kbforge_service::{GenerativeService, ServiceReply};
use kbforge_shared::{
    AppConfig, ArticleRecord, FailureReason, IncidentId, KbForgeError, KnowledgeBaseConfig,
    NewArticle, Result,
};

use crate::prompt::{self, PromptBuilder};
use crate::resolver::KnowledgeBaseResolver;
use crate::stages;
use crate::store::RecordStore;

// ---------------------------------------------------------------------------
// Config and outcome
// ---------------------------------------------------------------------------

/// Settings for a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Model id written into every payload.
    pub model: String,
    /// Sampling temperature written into every payload.
    pub temperature: f32,
    /// Container selection.
    pub knowledge_base: KnowledgeBaseConfig,
    /// Type tag on incident → article links.
    pub relationship_kind: String,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            model: config.service.model.clone(),
            temperature: config.service.temperature,
            knowledge_base: config.knowledge_base.clone(),
            relationship_kind: config.relationship.kind.clone(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The new draft article.
    pub article: ArticleRecord,
    /// Title the article was filed under.
    pub title: String,
    /// Container the article was filed under, if any.
    pub knowledge_base_id: Option<String>,
    /// Whether the incident → article link was written.
    pub linked: bool,
    /// Total elapsed time.
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Pipeline state transitions, in the order a successful run visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    ContextLoaded,
    PromptBuilt,
    ServiceCalled,
    ResponseParsed,
    ArticleCreated,
    Linked,
    LinkSkipped,
    Done,
    /// Terminal failure. Never follows `ArticleCreated`.
    Failed(FailureReason),
}

impl Stage {
    /// Short human-readable label for progress displays.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Start => "Starting",
            Self::ContextLoaded => "Loaded incident",
            Self::PromptBuilt => "Built prompt",
            Self::ServiceCalled => "Generative service replied",
            Self::ResponseParsed => "Parsed generated article",
            Self::ArticleCreated => "Created draft article",
            Self::Linked => "Linked article to incident",
            Self::LinkSkipped => "Skipped incident link",
            Self::Done => "Done",
            Self::Failed(_) => "Failed",
        }
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called on every state transition.
    fn stage(&self, stage: Stage);
    /// Called once when a run succeeds.
    fn done(&self, outcome: &RunOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _stage: Stage) {}
    fn done(&self, _outcome: &RunOutcome) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Drafts knowledge-base articles from incidents.
///
/// Runs are independent: nothing but the resolver's container cache is
/// carried between calls to [`run`](Self::run), and concurrent runs for the
/// same incident are not coordinated.
pub struct Pipeline<S, G> {
    store: S,
    service: G,
    prompts: PromptBuilder,
    resolver: KnowledgeBaseResolver,
    relationship_kind: String,
}

impl<S: RecordStore, G: GenerativeService> Pipeline<S, G> {
    pub fn new(store: S, service: G, config: &PipelineConfig) -> Self {
        Self {
            store,
            service,
            prompts: PromptBuilder::new(config.model.clone(), config.temperature),
            resolver: KnowledgeBaseResolver::new(&config.knowledge_base),
            relationship_kind: config.relationship_kind.clone(),
        }
    }

    /// The underlying record store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The container resolver, e.g. to invalidate its cache.
    pub fn resolver(&self) -> &KnowledgeBaseResolver {
        &self.resolver
    }

    /// Run the full pipeline for one incident.
    ///
    /// 1. Validate the identifier (no I/O on failure)
    /// 2. Load the incident
    /// 3. Build the prompt
    /// 4. Call the generative service; non-200 aborts
    /// 5. Parse the reply
    /// 6. Resolve the container (absence and lookup errors are non-fatal)
    /// 7. Insert the draft article
    /// 8. Link it to the incident (failure is logged, never returned)
    ///
    /// Fatal failures are logged here with their reason code before being
    /// returned; nothing written before the failure is rolled back.
    #[instrument(skip_all, fields(incident_id = %incident_id))]
    pub async fn run(
        &self,
        incident_id: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<RunOutcome> {
        let start = Instant::now();
        progress.stage(Stage::Start);

        match self.run_stages(incident_id, start, progress).await {
            Ok(outcome) => {
                progress.stage(Stage::Done);
                progress.done(&outcome);
                info!(
                    article_id = %outcome.article.id,
                    number = %outcome.article.number,
                    linked = outcome.linked,
                    elapsed_ms = outcome.elapsed.as_millis(),
                    "generate pipeline complete"
                );
                Ok(outcome)
            }
            Err(e) => {
                let reason = e.reason();
                progress.stage(Stage::Failed(reason));
                error!(%reason, incident_id, error = %e, "generate pipeline failed");
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        raw_id: &str,
        start: Instant,
        progress: &dyn ProgressReporter,
    ) -> Result<RunOutcome> {
        let incident_id = IncidentId::parse(raw_id)?;

        // --- Context ---
        let context = stages::load_context(&self.store, &incident_id).await?;
        progress.stage(Stage::ContextLoaded);

        // --- Prompt ---
        let payload = self.prompts.build(&context);
        let prompt_hash = prompt::prompt_hash(&payload);
        progress.stage(Stage::PromptBuilt);

        // --- Service call ---
        let reply = self.service.send(&payload).await?;
        progress.stage(Stage::ServiceCalled);
        check_status(&reply)?;

        // --- Parse ---
        let body = kbforge_service::parse(&reply)?;
        progress.stage(Stage::ResponseParsed);

        // --- Container ---
        let knowledge_base_id = match self.resolver.resolve_default(&self.store).await {
            Ok(Some(id)) => Some(id),
            Ok(None) => {
                info!("no matching knowledge base, filing article without one");
                None
            }
            Err(e) => {
                warn!(error = %e, "knowledge base lookup failed, filing article without one");
                None
            }
        };

        // --- Article ---
        let title = context.draft_title();
        let article = NewArticle {
            model: Some(payload.model.clone()),
            prompt_hash: Some(prompt_hash),
            ..NewArticle::draft(title.clone(), body, knowledge_base_id.clone())
        };
        let record = stages::create_article(&self.store, &article).await?;
        progress.stage(Stage::ArticleCreated);

        // --- Link (best effort) ---
        let linked = match stages::link_article(
            &self.store,
            &incident_id,
            &record.id,
            &self.relationship_kind,
        )
        .await
        {
            Ok(_) => {
                progress.stage(Stage::Linked);
                true
            }
            Err(e) => {
                warn!(
                    reason = %e.reason(),
                    article_id = %record.id,
                    error = %e,
                    "failed to link article to incident"
                );
                progress.stage(Stage::LinkSkipped);
                false
            }
        };

        Ok(RunOutcome {
            article: record,
            title,
            knowledge_base_id,
            linked,
            elapsed: start.elapsed(),
        })
    }
}

/// Abort on anything but HTTP 200, keeping a body excerpt for diagnosis.
fn check_status(reply: &ServiceReply) -> Result<()> {
    if reply.is_ok() {
        Ok(())
    } else {
        Err(KbForgeError::service(reply.status_code, &reply.raw_body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use kbforge_service::ServiceClient;
    use kbforge_shared::{IncidentContext, ServiceConfig, WorkflowState};
    use kbforge_storage::Storage;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GENERATED: &str = "Problem: VPN sessions drop every 10 minutes.\n\nResolution: Upgrade the VPN client to 6.0.1 and raise the gateway keepalive interval.";

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("kbforge_pipeline_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&tmp).await.expect("open test db");
        let fixture = std::fs::read_to_string("../../../fixtures/incidents/vpn-drops.json")
            .expect("read incident fixture");
        let incident: IncidentContext = serde_json::from_str(&fixture).expect("parse fixture");
        storage.insert_incident(&incident).await.expect("seed incident");
        storage
    }

    fn incident_id() -> String {
        "9d1f6c0e2b7a4f1c8e3d5a6b7c8d9e0f".to_string()
    }

    fn client_for(endpoint: String) -> ServiceClient {
        let config = ServiceConfig {
            endpoint,
            api_key_env: "KBFORGE_TEST_UNSET_KEY_9876".into(),
            timeout_secs: 2,
            ..ServiceConfig::default()
        };
        ServiceClient::new(&config).expect("build client")
    }

    async fn mock_service(status: u16, body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    fn endpoint(server: &MockServer) -> String {
        format!("{}/v1/chat/completions", server.uri())
    }

    fn ok_body() -> String {
        std::fs::read_to_string("../../../fixtures/service/chat-completion.json")
            .expect("read reply fixture")
    }

    /// Records every stage transition.
    #[derive(Default)]
    struct RecordingProgress {
        stages: Mutex<Vec<Stage>>,
    }

    impl RecordingProgress {
        fn stages(&self) -> Vec<Stage> {
            self.stages.lock().unwrap().clone()
        }
    }

    impl ProgressReporter for RecordingProgress {
        fn stage(&self, stage: Stage) {
            self.stages.lock().unwrap().push(stage);
        }
        fn done(&self, _outcome: &RunOutcome) {}
    }

    /// Real store whose relationship inserts always fail.
    struct BrokenLinks(Storage);

    impl RecordStore for BrokenLinks {
        async fn find_incident(&self, id: &IncidentId) -> Result<Option<IncidentContext>> {
            self.0.find_incident(id).await
        }
        async fn find_knowledge_base(&self, fragment: &str) -> Result<Option<String>> {
            self.0.find_knowledge_base(fragment).await
        }
        async fn insert_article(&self, article: &NewArticle) -> Result<ArticleRecord> {
            RecordStore::insert_article(&self.0, article).await
        }
        async fn insert_relationship(&self, _p: &str, _c: &str, _k: &str) -> Result<String> {
            Err(KbForgeError::Storage("relationships table is locked".into()))
        }
    }

    #[tokio::test]
    async fn successful_run_creates_one_draft_and_link() {
        let server = mock_service(200, &ok_body()).await;
        let storage = test_storage().await;
        let kb_id = storage.insert_knowledge_base("IT Knowledge Base").await.unwrap();
        let pipeline = Pipeline::new(
            storage,
            client_for(endpoint(&server)),
            &PipelineConfig::default(),
        );

        let progress = RecordingProgress::default();
        let outcome = pipeline.run(&incident_id(), &progress).await.expect("run");

        assert_eq!(outcome.title, "KB from INC0010001: VPN drops every 10 minutes");
        assert_eq!(outcome.knowledge_base_id.as_deref(), Some(kb_id.as_str()));
        assert!(outcome.linked);
        assert_eq!(outcome.article.number, "KB0000001");

        let store = pipeline.store();
        assert_eq!(store.count_articles().await.unwrap(), 1);
        let article = store.get_article(&outcome.article.id).await.unwrap().unwrap();
        assert_eq!(article.body, GENERATED);
        assert_eq!(article.title, outcome.title);
        assert_eq!(article.workflow_state, WorkflowState::Draft);
        assert_eq!(article.model.as_deref(), Some("gpt-4.1-mini"));
        assert_eq!(article.prompt_hash.as_ref().map(String::len), Some(64));

        let rels = store.list_relationships_for_parent(&incident_id()).await.unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].child_id, outcome.article.id.to_string());
        assert_eq!(rels[0].kind, "KB");

        assert_eq!(
            progress.stages(),
            vec![
                Stage::Start,
                Stage::ContextLoaded,
                Stage::PromptBuilt,
                Stage::ServiceCalled,
                Stage::ResponseParsed,
                Stage::ArticleCreated,
                Stage::Linked,
                Stage::Done,
            ]
        );
    }

    #[tokio::test]
    async fn missing_knowledge_base_is_not_fatal() {
        let server = mock_service(200, &ok_body()).await;
        let storage = test_storage().await;
        storage.insert_knowledge_base("HR Policies").await.unwrap();
        let pipeline = Pipeline::new(
            storage,
            client_for(endpoint(&server)),
            &PipelineConfig::default(),
        );

        let outcome = pipeline.run(&incident_id(), &SilentProgress).await.expect("run");
        assert!(outcome.knowledge_base_id.is_none());

        let article = pipeline
            .store()
            .get_article(&outcome.article.id)
            .await
            .unwrap()
            .unwrap();
        assert!(article.knowledge_base_id.is_none());
    }

    #[tokio::test]
    async fn knowledge_base_cache_refreshes_after_invalidate() {
        let server = mock_service(200, &ok_body()).await;
        let pipeline = Pipeline::new(
            test_storage().await,
            client_for(endpoint(&server)),
            &PipelineConfig::default(),
        );

        let first = pipeline.run(&incident_id(), &SilentProgress).await.unwrap();
        assert!(first.knowledge_base_id.is_none());

        let kb_id = pipeline
            .store()
            .insert_knowledge_base("IT Knowledge Base")
            .await
            .unwrap();
        let cached = pipeline.run(&incident_id(), &SilentProgress).await.unwrap();
        assert!(cached.knowledge_base_id.is_none());

        pipeline.resolver().invalidate();
        let refreshed = pipeline.run(&incident_id(), &SilentProgress).await.unwrap();
        assert_eq!(refreshed.knowledge_base_id.as_deref(), Some(kb_id.as_str()));
    }

    #[tokio::test]
    async fn empty_identifier_fails_without_io() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ok_body()))
            .expect(0)
            .mount(&server)
            .await;
        let pipeline = Pipeline::new(
            test_storage().await,
            client_for(endpoint(&server)),
            &PipelineConfig::default(),
        );

        for raw in ["", "   "] {
            let progress = RecordingProgress::default();
            let err = pipeline.run(raw, &progress).await.unwrap_err();
            assert_eq!(err.reason(), FailureReason::InvalidInput);
            assert_eq!(
                progress.stages(),
                vec![Stage::Start, Stage::Failed(FailureReason::InvalidInput)]
            );
        }

        assert_eq!(pipeline.store().count_articles().await.unwrap(), 0);
        assert_eq!(pipeline.store().count_relationships().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_incident_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ok_body()))
            .expect(0)
            .mount(&server)
            .await;
        let pipeline = Pipeline::new(
            test_storage().await,
            client_for(endpoint(&server)),
            &PipelineConfig::default(),
        );

        let err = pipeline.run("no-such-incident", &SilentProgress).await.unwrap_err();
        assert!(matches!(err, KbForgeError::NotFound { .. }));
        assert_eq!(pipeline.store().count_articles().await.unwrap(), 0);
        assert_eq!(pipeline.store().count_relationships().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn status_500_is_service_error() {
        let server = mock_service(500, r#"{"error":{"message":"overloaded"}}"#).await;
        let pipeline = Pipeline::new(
            test_storage().await,
            client_for(endpoint(&server)),
            &PipelineConfig::default(),
        );

        let progress = RecordingProgress::default();
        let err = pipeline.run(&incident_id(), &progress).await.unwrap_err();
        match &err {
            KbForgeError::Service { status, body } => {
                assert_eq!(*status, 500);
                assert!(body.contains("overloaded"));
            }
            other => panic!("expected service error, got {other}"),
        }
        assert_eq!(pipeline.store().count_articles().await.unwrap(), 0);
        assert_eq!(
            progress.stages().last(),
            Some(&Stage::Failed(FailureReason::ServiceError))
        );
    }

    #[tokio::test]
    async fn empty_choices_is_malformed() {
        let body = std::fs::read_to_string("../../../fixtures/service/empty-choices.json")
            .expect("read fixture");
        let server = mock_service(200, &body).await;
        let pipeline = Pipeline::new(
            test_storage().await,
            client_for(endpoint(&server)),
            &PipelineConfig::default(),
        );

        let err = pipeline.run(&incident_id(), &SilentProgress).await.unwrap_err();
        assert_eq!(err.reason(), FailureReason::MalformedResponse);
        assert_eq!(pipeline.store().count_articles().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unreachable_service_is_transport_error() {
        let pipeline = Pipeline::new(
            test_storage().await,
            client_for("http://127.0.0.1:1/v1/chat/completions".into()),
            &PipelineConfig::default(),
        );

        let err = pipeline.run(&incident_id(), &SilentProgress).await.unwrap_err();
        assert_eq!(err.reason(), FailureReason::TransportError);
        assert_eq!(pipeline.store().count_articles().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rejected_insert_is_persistence_failure() {
        let server = mock_service(200, &ok_body()).await;
        let tmp = std::env::temp_dir().join(format!("kbforge_pipeline_{}.db", Uuid::now_v7()));
        {
            let rw = Storage::open(&tmp).await.unwrap();
            rw.insert_incident(&IncidentContext {
                id: incident_id(),
                number: "INC0010001".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        }
        let readonly = Storage::open_readonly(&tmp).await.unwrap();
        let pipeline = Pipeline::new(
            readonly,
            client_for(endpoint(&server)),
            &PipelineConfig::default(),
        );

        let progress = RecordingProgress::default();
        let err = pipeline.run(&incident_id(), &progress).await.unwrap_err();
        assert_eq!(err.reason(), FailureReason::PersistenceFailure);
        assert!(!progress.stages().contains(&Stage::ArticleCreated));
        assert_eq!(pipeline.store().count_articles().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn link_failure_still_returns_article() {
        let server = mock_service(200, &ok_body()).await;
        let pipeline = Pipeline::new(
            BrokenLinks(test_storage().await),
            client_for(endpoint(&server)),
            &PipelineConfig::default(),
        );

        let progress = RecordingProgress::default();
        let outcome = pipeline.run(&incident_id(), &progress).await.expect("run");
        assert!(!outcome.linked);

        let store = &pipeline.store().0;
        assert!(store.get_article(&outcome.article.id).await.unwrap().is_some());
        assert_eq!(store.count_relationships().await.unwrap(), 0);

        let stages = progress.stages();
        assert!(stages.contains(&Stage::LinkSkipped));
        assert_eq!(stages.last(), Some(&Stage::Done));
        assert!(!stages.iter().any(|s| matches!(s, Stage::Failed(_))));
    }

    #[tokio::test]
    async fn repeated_runs_create_distinct_articles() {
        let server = mock_service(200, &ok_body()).await;
        let pipeline = Pipeline::new(
            test_storage().await,
            client_for(endpoint(&server)),
            &PipelineConfig::default(),
        );

        let first = pipeline.run(&incident_id(), &SilentProgress).await.unwrap();
        let second = pipeline.run(&incident_id(), &SilentProgress).await.unwrap();
        assert_ne!(first.article.id, second.article.id);
        assert_eq!(pipeline.store().count_articles().await.unwrap(), 2);
        assert_eq!(pipeline.store().count_relationships().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn configured_kind_and_model_are_used() {
        let server = mock_service(200, &ok_body()).await;
        let config = PipelineConfig {
            model: "gpt-4o-mini".into(),
            relationship_kind: "knowledge".into(),
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::new(test_storage().await, client_for(endpoint(&server)), &config);

        let outcome = pipeline.run(&incident_id(), &SilentProgress).await.unwrap();
        let store = pipeline.store();
        let article = store.get_article(&outcome.article.id).await.unwrap().unwrap();
        assert_eq!(article.model.as_deref(), Some("gpt-4o-mini"));

        let rels = store.list_relationships_for_parent(&incident_id()).await.unwrap();
        assert_eq!(rels[0].kind, "knowledge");
    }
}
