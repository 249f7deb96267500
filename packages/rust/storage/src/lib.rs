//! libSQL record store (local, offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding incidents,
//! knowledge-base containers, articles, and relationship links.
//!
//! **Access rules:**
//! - Pipeline runs and CLI imports: read-write via [`Storage::open`]
//! - Inspection tooling: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use kbforge_shared::{
    Article, ArticleId, ArticleRecord, IncidentContext, KbForgeError, KnowledgeBase, NewArticle,
    Relationship, Result, article_number,
};
use libsql::{Connection, Database, params};
use uuid::Uuid;

/// Column list shared by every article query.
const ARTICLE_COLUMNS: &str =
    "seq, id, knowledge_base_id, title, body, workflow_state, model, prompt_hash, created_at";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| KbForgeError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode. Every write is rejected.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        KbForgeError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(KbForgeError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Incident operations
    // -----------------------------------------------------------------------

    /// Insert an incident record. `created_at` is set to now.
    pub async fn insert_incident(&self, incident: &IncidentContext) -> Result<()> {
        self.check_writable()?;
        if incident.id.trim().is_empty() {
            return Err(KbForgeError::validation("incident id must not be empty"));
        }
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO incidents (id, number, short_description, description, category,
                                        subcategory, configuration_item, assignment_group,
                                        close_notes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    incident.id.as_str(),
                    incident.number.as_str(),
                    incident.short_description.as_str(),
                    incident.description.as_str(),
                    incident.category.as_str(),
                    incident.subcategory.as_str(),
                    incident.configuration_item.as_str(),
                    incident.assignment_group.as_str(),
                    incident.close_notes.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Look up one incident by id. NULL columns come back as empty strings.
    pub async fn get_incident(&self, id: &str) -> Result<Option<IncidentContext>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id,
                        COALESCE(number, ''),
                        COALESCE(short_description, ''),
                        COALESCE(description, ''),
                        COALESCE(category, ''),
                        COALESCE(subcategory, ''),
                        COALESCE(configuration_item, ''),
                        COALESCE(assignment_group, ''),
                        COALESCE(close_notes, '')
                 FROM incidents WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(IncidentContext {
                id: text(&row, 0)?,
                number: text(&row, 1)?,
                short_description: text(&row, 2)?,
                description: text(&row, 3)?,
                category: text(&row, 4)?,
                subcategory: text(&row, 5)?,
                configuration_item: text(&row, 6)?,
                assignment_group: text(&row, 7)?,
                close_notes: text(&row, 8)?,
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Knowledge-base operations
    // -----------------------------------------------------------------------

    /// Insert a knowledge-base container. Returns the generated id.
    pub async fn insert_knowledge_base(&self, title: &str) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO knowledge_bases (id, title, created_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), title, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(id)
    }

    /// First container (by insertion order) whose title contains `fragment`.
    pub async fn find_knowledge_base_by_title(
        &self,
        fragment: &str,
    ) -> Result<Option<KnowledgeBase>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, title, created_at FROM knowledge_bases
                 WHERE instr(title, ?1) > 0
                 ORDER BY rowid
                 LIMIT 1",
                params![fragment],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_knowledge_base(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// List all containers, oldest first.
    pub async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBase>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, title, created_at FROM knowledge_bases ORDER BY rowid",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_knowledge_base(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Article operations
    // -----------------------------------------------------------------------

    /// Insert one article. The store assigns its id and number.
    pub async fn insert_article(&self, article: &NewArticle) -> Result<ArticleRecord> {
        self.check_writable()?;
        let id = ArticleId::new();
        let id_str = id.to_string();
        let now = Utc::now().to_rfc3339();
        let mut rows = self
            .conn
            .query(
                "INSERT INTO articles (id, knowledge_base_id, title, body, workflow_state,
                                       model, prompt_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 RETURNING seq",
                params![
                    id_str.as_str(),
                    article.knowledge_base_id.as_deref(),
                    article.title.as_str(),
                    article.body.as_str(),
                    article.workflow_state.as_str(),
                    article.model.as_deref(),
                    article.prompt_hash.as_deref(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;

        let seq: i64 = match rows.next().await {
            Ok(Some(row)) => row.get(0).map_err(storage_err)?,
            Ok(None) => {
                return Err(KbForgeError::Storage(
                    "article insert returned no row".into(),
                ));
            }
            Err(e) => return Err(storage_err(e)),
        };

        tracing::debug!(article_id = %id, seq, "article inserted");

        Ok(ArticleRecord {
            id,
            number: article_number(seq),
        })
    }

    /// Get an article by id.
    pub async fn get_article(&self, id: &ArticleId) -> Result<Option<Article>> {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?1");
        let id_str = id.to_string();
        let mut rows = self
            .conn
            .query(&sql, params![id_str.as_str()])
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_article(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// List all articles in insertion order.
    pub async fn list_articles(&self) -> Result<Vec<Article>> {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles ORDER BY seq");
        let mut rows = self
            .conn
            .query(&sql, params![])
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_article(&row)?);
        }
        Ok(results)
    }

    /// Total number of articles.
    pub async fn count_articles(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM articles").await
    }

    // -----------------------------------------------------------------------
    // Relationship operations
    // -----------------------------------------------------------------------

    /// Insert a relationship record. Returns the generated id.
    pub async fn insert_relationship(
        &self,
        parent_id: &str,
        child_id: &str,
        kind: &str,
    ) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO relationships (id, parent_id, child_id, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.as_str(), parent_id, child_id, kind, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(id)
    }

    /// Relationships whose parent is `parent_id`, oldest first.
    pub async fn list_relationships_for_parent(
        &self,
        parent_id: &str,
    ) -> Result<Vec<Relationship>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, parent_id, child_id, kind, created_at FROM relationships
                 WHERE parent_id = ?1 ORDER BY rowid",
                params![parent_id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(Relationship {
                id: text(&row, 0)?,
                parent_id: text(&row, 1)?,
                child_id: text(&row, 2)?,
                kind: text(&row, 3)?,
                created_at: timestamp(&row, 4)?,
            });
        }
        Ok(results)
    }

    /// Total number of relationships.
    pub async fn count_relationships(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM relationships").await
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let mut rows = self.conn.query(sql, params![]).await.map_err(storage_err)?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_err(storage_err)? as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(storage_err(e)),
        }
    }
}

fn storage_err(e: libsql::Error) -> KbForgeError {
    KbForgeError::Storage(e.to_string())
}

fn text(row: &libsql::Row, idx: i32) -> Result<String> {
    row.get::<String>(idx).map_err(storage_err)
}

fn timestamp(row: &libsql::Row, idx: i32) -> Result<DateTime<Utc>> {
    let s = text(row, idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| KbForgeError::Storage(format!("invalid date: {e}")))
}

fn row_to_knowledge_base(row: &libsql::Row) -> Result<KnowledgeBase> {
    Ok(KnowledgeBase {
        id: text(row, 0)?,
        title: text(row, 1)?,
        created_at: timestamp(row, 2)?,
    })
}

/// Convert a database row (in [`ARTICLE_COLUMNS`] order) to an [`Article`].
fn row_to_article(row: &libsql::Row) -> Result<Article> {
    let seq: i64 = row.get(0).map_err(storage_err)?;
    let id = text(row, 1)?
        .parse::<ArticleId>()
        .map_err(|e| KbForgeError::Storage(format!("invalid article id: {e}")))?;
    Ok(Article {
        id,
        number: article_number(seq),
        knowledge_base_id: row.get::<String>(2).ok(),
        title: text(row, 3)?,
        body: text(row, 4)?,
        workflow_state: text(row, 5)?.parse()?,
        model: row.get::<String>(6).ok(),
        prompt_hash: row.get::<String>(7).ok(),
        created_at: timestamp(row, 8)?,
    })
}
