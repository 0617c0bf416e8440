use std::path::PathBuf;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, ErrorCode};
use shop_backup_core::Document;

use crate::codec::{decode_body, encode_for_insert};
use crate::store::{DocumentStore, Filter, InsertManyOutcome, WriteFailure};

/// SQLite-backed document store. Each method opens a fresh connection; a
/// bulk insert commits once, keeping the records that were accepted.
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let store = Self { db_path };
        store.init_db()?;
        Ok(store)
    }

    fn init_db(&self) -> Result<()> {
        let conn = open(&self.db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (collection, doc_id)
            );",
        )?;
        Ok(())
    }
}

fn open(db_path: &PathBuf) -> Result<Connection> {
    Connection::open(db_path).context("open document db")
}

fn load_collection(conn: &Connection, collection: &str) -> Result<Vec<(String, Document)>> {
    let mut stmt = conn.prepare("SELECT doc_id, body FROM documents WHERE collection = ?1 ORDER BY rowid")?;
    let rows = stmt
        .query_map([collection], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(key, body)| Ok((key, decode_body(&body)?)))
        .collect()
}

#[async_trait::async_trait]
impl DocumentStore for SqliteStore {
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        let db_path = self.db_path.clone();
        let collection = collection.to_owned();
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            Ok(load_collection(&conn, &collection)?
                .into_iter()
                .map(|(_, doc)| doc)
                .filter(|doc| filter.matches(doc))
                .collect())
        })
        .await?
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<InsertManyOutcome> {
        let db_path = self.db_path.clone();
        let collection = collection.to_owned();
        tokio::task::spawn_blocking(move || {
            let mut conn = open(&db_path)?;
            let tx = conn.transaction()?;
            let mut outcome = InsertManyOutcome::default();
            for (index, doc) in docs.into_iter().enumerate() {
                let encoded = match encode_for_insert(doc) {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        outcome.failures.push(WriteFailure {
                            index,
                            message: format!("{e:#}"),
                        });
                        continue;
                    }
                };
                let result = tx.execute(
                    "INSERT INTO documents (collection, doc_id, body) VALUES (?1, ?2, ?3)",
                    params![collection, encoded.key, encoded.body],
                );
                match result {
                    Ok(_) => outcome.inserted += 1,
                    Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
                        outcome.failures.push(WriteFailure {
                            index,
                            message: format!("duplicate key: _id {} already exists", encoded.display_id),
                        });
                    }
                    Err(e) => outcome.failures.push(WriteFailure {
                        index,
                        message: e.to_string(),
                    }),
                }
            }
            tx.commit()?;
            Ok(outcome)
        })
        .await?
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let db_path = self.db_path.clone();
        let collection = collection.to_owned();
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = open(&db_path)?;
            if filter == Filter::All {
                let removed = conn.execute("DELETE FROM documents WHERE collection = ?1", [&collection])?;
                return Ok(removed as u64);
            }

            let doomed: Vec<String> = load_collection(&conn, &collection)?
                .into_iter()
                .filter(|(_, doc)| filter.matches(doc))
                .map(|(key, _)| key)
                .collect();

            let tx = conn.transaction()?;
            for key in &doomed {
                tx.execute(
                    "DELETE FROM documents WHERE collection = ?1 AND doc_id = ?2",
                    params![collection, key],
                )?;
            }
            tx.commit()?;
            Ok(doomed.len() as u64)
        })
        .await?
    }

    async fn count_documents(&self, collection: &str, filter: &Filter) -> Result<u64> {
        if filter != &Filter::All {
            return Ok(self.find(collection, filter).await?.len() as u64);
        }
        let db_path = self.db_path.clone();
        let collection = collection.to_owned();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                [&collection],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shop_backup_core::{Value, ID_FIELD};

    fn doc(id: &str, order_id: &str) -> Document {
        let mut doc = Document::new();
        doc.insert(ID_FIELD.into(), Value::String(id.into()));
        doc.insert("orderId".into(), Value::String(order_id.into()));
        doc
    }

    fn store() -> (tempfile::TempDir, SqliteStore) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::new(tmp.path().join("documents.db")).expect("store");
        (tmp, store)
    }

    #[tokio::test]
    async fn insert_find_and_count_per_collection() {
        let (_tmp, store) = store();
        let outcome = store
            .insert_many("orders", vec![doc("a", "ORD-1"), doc("b", "ORD-2")])
            .await
            .expect("insert");
        assert_eq!(outcome.inserted, 2);
        assert!(outcome.failures.is_empty());

        assert_eq!(store.count_documents("orders", &Filter::All).await.expect("count"), 2);
        assert_eq!(store.count_documents("reviews", &Filter::All).await.expect("count"), 0);

        let found = store
            .find("orders", &Filter::eq("orderId", Value::String("ORD-2".into())))
            .await
            .expect("find");
        assert_eq!(found, vec![doc("b", "ORD-2")]);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected_without_stopping_the_batch() {
        let (_tmp, store) = store();
        let outcome = store
            .insert_many("products", vec![doc("p1", "x"), doc("p1", "y"), doc("p2", "z")])
            .await
            .expect("insert");

        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].index, 1);
        assert!(outcome.failures[0].message.contains("p1"));
    }

    #[tokio::test]
    async fn delete_many_honours_filters() {
        let (_tmp, store) = store();
        store
            .insert_many("orders", vec![doc("a", "ORD-1"), doc("b", "ORD-2"), doc("c", "ORD-3")])
            .await
            .expect("insert");

        let removed = store
            .delete_many(
                "orders",
                &Filter::any_of("orderId", vec![Value::String("ORD-1".into()), Value::String("ORD-3".into())]),
            )
            .await
            .expect("delete");
        assert_eq!(removed, 2);

        let removed_all = store.delete_many("orders", &Filter::All).await.expect("delete all");
        assert_eq!(removed_all, 1);
        assert!(store.find("orders", &Filter::All).await.expect("find").is_empty());
    }
}
