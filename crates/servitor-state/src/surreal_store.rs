//! SurrealDB-backed vector store
//!
//! Records live in the `vector_memory` table; ranking uses SurrealQL's
//! `vector::similarity::cosine`. Supports the in-memory engine (`mem://`)
//! and any remote endpoint reachable through `surrealdb::engine::any`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::schema::{surreal_datetime, ChatLine, VectorRecall, VectorRecord};
use crate::storage_traits::{RecallFilter, StorageResult, VectorStore};

const NAMESPACE: &str = "servitor";
const DATABASE: &str = "main";

/// Row layout of the `vector_memory` table
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorRow {
    lines: Vec<ChatLine>,
    tokens: usize,
    #[serde(with = "surreal_datetime")]
    created_at: DateTime<Utc>,
    embedding: Vec<f32>,
    channel: String,
}

/// Projection returned by the similarity query
#[derive(Debug, Deserialize)]
struct RecallRow {
    lines: Vec<ChatLine>,
    tokens: usize,
    #[serde(with = "surreal_datetime")]
    created_at: DateTime<Utc>,
    similarity: f64,
}

/// SurrealDB connection handle storing embedded line windows
#[derive(Clone)]
pub struct SurrealVectorStore {
    db: Surreal<Any>,
}

impl SurrealVectorStore {
    /// Connect to SurrealDB in-memory and set up schema
    #[instrument(skip_all)]
    pub async fn setup_db() -> StorageResult<Self> {
        Self::connect("mem://").await
    }

    /// Connect to any SurrealDB endpoint (`mem://`, `surrealkv://path`,
    /// `ws://host:port`, ...) and set up schema
    #[instrument]
    pub async fn connect(endpoint: &str) -> StorageResult<Self> {
        info!("Connecting to SurrealDB vector store");

        let db = surrealdb::engine::any::connect(endpoint)
            .await
            .map_err(|e| {
                StorageError::Connection(format!("Failed to connect to {}: {}", endpoint, e))
            })?;

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = SurrealVectorStore { db };
        store.init_schema().await?;

        info!("SurrealDB vector store ready");
        Ok(store)
    }

    /// Connect to `SURREALDB_URL` when set, otherwise in-memory
    pub async fn setup_from_env() -> StorageResult<Self> {
        match std::env::var("SURREALDB_URL") {
            Ok(url) => Self::connect(&url).await,
            Err(_) => Self::setup_db().await,
        }
    }

    async fn init_schema(&self) -> StorageResult<()> {
        debug!("Initializing vector_memory schema");

        let schema = r#"
            DEFINE TABLE IF NOT EXISTS vector_memory SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS idx_vector_channel ON vector_memory FIELDS channel;
            DEFINE INDEX IF NOT EXISTS idx_vector_created ON vector_memory FIELDS created_at;
        "#;

        self.db
            .query(schema)
            .await
            .and_then(|r| r.check())
            .map_err(|e| StorageError::SchemaSetup(e.to_string()))?;

        Ok(())
    }

    /// Number of stored records
    pub async fn count(&self) -> StorageResult<usize> {
        #[derive(Deserialize)]
        struct CountRow {
            count: usize,
        }

        let mut result = self
            .db
            .query("SELECT count() AS count FROM vector_memory GROUP ALL")
            .await?;
        let rows: Vec<CountRow> = result.take(0)?;
        Ok(rows.first().map(|r| r.count).unwrap_or(0))
    }
}

#[async_trait]
impl VectorStore for SurrealVectorStore {
    #[instrument(skip(self, record), fields(channel = %record.channel, tokens = record.tokens))]
    async fn store(&self, record: VectorRecord) -> StorageResult<()> {
        debug!("Saving vector record");

        let row = VectorRow {
            lines: record.lines,
            tokens: record.tokens,
            created_at: record.timestamp,
            embedding: record.embedding,
            channel: record.channel,
        };

        self.db
            .query("CREATE vector_memory CONTENT $row")
            .bind(("row", row))
            .await?
            .check()?;

        Ok(())
    }

    #[instrument(skip(self, embedding), fields(limit = filter.limit, max_tokens = filter.max_tokens))]
    async fn retrieve(
        &self,
        embedding: &[f32],
        filter: &RecallFilter,
    ) -> StorageResult<Vec<VectorRecall>> {
        let recency = if filter.channel.is_some() {
            "(created_at < $before OR channel != $channel)"
        } else {
            "created_at < $before"
        };
        let sql = format!(
            "SELECT lines, tokens, created_at, \
                vector::similarity::cosine(embedding, $embedding) AS similarity \
             FROM vector_memory \
             WHERE tokens <= $max_tokens AND {recency} \
             ORDER BY similarity DESC, created_at ASC \
             LIMIT {limit}",
            limit = filter.limit,
        );

        let mut result = self
            .db
            .query(sql)
            .bind(("embedding", embedding.to_vec()))
            .bind(("max_tokens", filter.max_tokens as i64))
            .bind(("before", SurrealDatetime::from(filter.before)))
            .bind(("channel", filter.channel.clone().unwrap_or_default()))
            .await?;

        let rows: Vec<RecallRow> = result.take(0)?;
        debug!(hits = rows.len(), "vector query finished");

        Ok(rows
            .into_iter()
            .map(|r| VectorRecall {
                lines: r.lines,
                tokens: r.tokens,
                timestamp: r.created_at,
                similarity: r.similarity as f32,
            })
            .collect())
    }
}
