use anyhow::{Context, Result};
use shop_backup_core::Document;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::codec::{decode_body, insert_each};
use crate::store::{DocumentStore, Filter, InsertManyOutcome};

/// Postgres-backed document store. Records are written one statement at a
/// time, so a failed record leaves the rest of its batch to be attempted.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connect to postgres")?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                seq BIGSERIAL,
                collection TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (collection, doc_id)
            )",
        )
        .execute(&self.pool)
        .await
        .context("create documents table")?;
        Ok(())
    }

    async fn load_collection(&self, collection: &str) -> Result<Vec<(String, Document)>> {
        let rows = sqlx::query("SELECT doc_id, body FROM documents WHERE collection = $1 ORDER BY seq")
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| {
                let body: String = r.get("body");
                Ok((r.get::<String, _>("doc_id"), decode_body(&body)?))
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl DocumentStore for PostgresStore {
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        Ok(self
            .load_collection(collection)
            .await?
            .into_iter()
            .map(|(_, doc)| doc)
            .filter(|doc| filter.matches(doc))
            .collect())
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<InsertManyOutcome> {
        let pool = &self.pool;
        Ok(insert_each(docs, |encoded| async move {
            let result = sqlx::query(
                "INSERT INTO documents (collection, doc_id, body) VALUES ($1, $2, $3)
                 ON CONFLICT (collection, doc_id) DO NOTHING",
            )
            .bind(collection)
            .bind(encoded.key)
            .bind(encoded.body)
            .execute(pool)
            .await
            .context("insert document")?;
            Ok(result.rows_affected() == 1)
        })
        .await)
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64> {
        if filter == &Filter::All {
            let result = sqlx::query("DELETE FROM documents WHERE collection = $1")
                .bind(collection)
                .execute(&self.pool)
                .await?;
            return Ok(result.rows_affected());
        }

        let doomed: Vec<String> = self
            .load_collection(collection)
            .await?
            .into_iter()
            .filter(|(_, doc)| filter.matches(doc))
            .map(|(key, _)| key)
            .collect();

        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND doc_id = ANY($2)")
            .bind(collection)
            .bind(&doomed)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_documents(&self, collection: &str, filter: &Filter) -> Result<u64> {
        if filter != &Filter::All {
            return Ok(self.find(collection, filter).await?.len() as u64);
        }
        let row = sqlx::query("SELECT COUNT(*) AS total FROM documents WHERE collection = $1")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("total") as u64)
    }
}
