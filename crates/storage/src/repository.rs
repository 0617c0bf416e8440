use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde_json::Value as Json;
use shop_backup_core::{
    document_from_json, document_to_export_json, export_stamp, parse_timestamp_fields, strip_credentials,
    BackupCollections, BackupDocument, Collection, DatabaseInfo, Document, RestorePolicy, RestoreSummary, Value,
    ID_FIELD,
};
use tracing::{info, warn};

use crate::codec::id_display;
use crate::postgres_store::PostgresStore;
use crate::sqlite_store::SqliteStore;
use crate::store::{DocumentStore, Filter};

/// Records per `insert_many` call during a restore.
pub const BATCH_SIZE: usize = 1000;

/// Export, restore and info over the application collections.
#[derive(Clone)]
pub struct BackupRepository {
    store: Arc<dyn DocumentStore>,
    database: String,
}

/// What a restore did to one collection.
#[derive(Debug)]
struct CollectionOutcome {
    collection: Collection,
    restored: Option<u64>,
    progress: Vec<String>,
    errors: Vec<String>,
}

/// A backup record converted for insertion, or the reason it cannot be.
type Prepared = std::result::Result<Document, String>;

impl BackupRepository {
    pub fn new(store: Arc<dyn DocumentStore>, database: impl Into<String>) -> Self {
        Self {
            store,
            database: database.into(),
        }
    }

    /// Postgres when a URL is given, otherwise SQLite under `root`.
    pub async fn init(root: PathBuf, database_url: Option<&str>, database: impl Into<String>) -> Result<Self> {
        let store: Arc<dyn DocumentStore> = match database_url {
            Some(url) => Arc::new(PostgresStore::new(url).await?),
            None => {
                fs::create_dir_all(&root).with_context(|| format!("create data root: {}", root.display()))?;
                Arc::new(SqliteStore::new(root.join("documents.db"))?)
            }
        };
        Ok(Self::new(store, database))
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.store)
    }

    /// Snapshot of every collection. Any store error aborts the whole export.
    pub async fn export(&self) -> Result<BackupDocument> {
        self.export_at(Local::now()).await
    }

    async fn export_at(&self, now: DateTime<Local>) -> Result<BackupDocument> {
        let mut collections = BackupCollections::default();
        for collection in Collection::ALL {
            let docs = self
                .store
                .find(collection.name(), &Filter::All)
                .await
                .with_context(|| format!("read {collection}"))?;
            let records = docs
                .into_iter()
                .map(|doc| export_record(collection, doc))
                .collect();
            collections.set(collection, records);
        }

        let stats = collections.stats();
        info!(
            database = %self.database,
            categories = stats.total_categories,
            products = stats.total_products,
            users = stats.total_users,
            orders = stats.total_orders,
            reviews = stats.total_reviews,
            "backup exported"
        );
        Ok(BackupDocument {
            timestamp: Some(export_stamp(now)),
            database: Some(self.database.clone()),
            collections,
            stats: Some(stats),
        })
    }

    /// Restores each collection present in the backup on its own; a failure
    /// in one never stops the others. Nothing is rolled back.
    pub async fn restore(&self, backup: &BackupDocument) -> RestoreSummary {
        let mut outcomes = Vec::new();
        for collection in Collection::RESTORE_ORDER {
            let Some(records) = backup.collections.get(collection) else {
                continue;
            };
            let outcome = match collection.restore_policy() {
                RestorePolicy::Overwrite => self.restore_overwrite(collection, records).await,
                RestorePolicy::MergeByKey(key) => self.restore_merge(collection, key, records).await,
                RestorePolicy::Skip => {
                    let mut out = CollectionOutcome::new(collection);
                    out.progress
                        .push(format!("{collection}: skipped {} documents, not restored", records.len()));
                    out
                }
            };
            outcomes.push(outcome);
        }

        let summary = fold_outcomes(outcomes, backup);
        info!(
            success = summary.success,
            errors = summary.errors.as_ref().map_or(0, Vec::len),
            "restore finished"
        );
        summary
    }

    pub async fn info(&self) -> Result<DatabaseInfo> {
        let mut collections = BTreeMap::new();
        for collection in Collection::ALL {
            let count = self
                .store
                .count_documents(collection.name(), &Filter::All)
                .await
                .with_context(|| format!("count {collection}"))?;
            collections.insert(collection.name().to_owned(), count);
        }
        Ok(DatabaseInfo {
            database: self.database.clone(),
            timestamp: Local::now().to_rfc3339(),
            total_documents: collections.values().sum(),
            collections,
        })
    }

    async fn restore_overwrite(&self, collection: Collection, records: &[Json]) -> CollectionOutcome {
        let mut out = CollectionOutcome::new(collection);
        out.progress
            .push(format!("{collection}: processing {} documents", records.len()));

        match self.store.delete_many(collection.name(), &Filter::All).await {
            Ok(removed) => out
                .progress
                .push(format!("{collection}: removed {removed} existing documents")),
            Err(e) => {
                warn!(%collection, error = %e, "clearing collection failed");
                return out.failed(format!("{collection}: {e:#}"));
            }
        }

        let inserted = self.batch_insert(&mut out, prepare(records)).await;
        out.restored = Some(inserted);
        out.progress
            .push(format!("{collection}: restored {inserted} documents in total"));
        out
    }

    async fn restore_merge(&self, collection: Collection, key: &str, records: &[Json]) -> CollectionOutcome {
        let mut out = CollectionOutcome::new(collection);
        out.progress
            .push(format!("{collection}: processing {} documents", records.len()));

        let prepared = prepare(records);
        let keys: Vec<Value> = prepared
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .filter_map(|doc| merge_key(doc, key))
            .cloned()
            .collect();

        let mut seen = HashSet::new();
        if !keys.is_empty() {
            match self
                .store
                .find(collection.name(), &Filter::any_of(key, keys))
                .await
            {
                Ok(existing) => {
                    seen.extend(existing.iter().filter_map(|doc| merge_key(doc, key)).map(key_fingerprint));
                    out.progress
                        .push(format!("{collection}: {} already present", seen.len()));
                }
                Err(e) => {
                    warn!(%collection, error = %e, "looking up existing keys failed");
                    return out.failed(format!("{collection}: {e:#}"));
                }
            }
        }

        let fresh: Vec<Prepared> = prepared
            .into_iter()
            .filter(|record| match record {
                Ok(doc) => merge_key(doc, key).map_or(true, |v| seen.insert(key_fingerprint(v))),
                Err(_) => true,
            })
            .collect();

        if fresh.is_empty() {
            out.restored = Some(0);
            out.progress.push(format!("{collection}: nothing new to add"));
            return out;
        }

        let inserted = self.batch_insert(&mut out, fresh).await;
        out.restored = Some(inserted);
        out.progress.push(format!("{collection}: added {inserted} new documents"));
        out
    }

    /// Best-effort insertion in fixed-size batches. Rejected records and failed
    /// batches are recorded and the remaining batches still run.
    async fn batch_insert(&self, out: &mut CollectionOutcome, records: Vec<Prepared>) -> u64 {
        let collection = out.collection;
        let mut total = 0;
        for (i, batch) in into_batches(records, BATCH_SIZE).into_iter().enumerate() {
            let number = i + 1;
            let attempted = batch.len();
            let mut rejected = Vec::new();
            let mut docs = Vec::with_capacity(attempted);
            for record in batch {
                match record {
                    Ok(doc) => docs.push(doc),
                    Err(message) => rejected.push(message),
                }
            }

            if !docs.is_empty() {
                match self.store.insert_many(collection.name(), docs).await {
                    Ok(outcome) => {
                        total += outcome.inserted;
                        rejected.extend(outcome.failures.into_iter().map(|f| f.message));
                        out.progress.push(format!(
                            "{collection}: batch {number} - {} documents inserted",
                            outcome.inserted
                        ));
                    }
                    Err(e) => {
                        warn!(%collection, batch = number, error = %e, "batch insert failed");
                        out.errors.push(format!("{collection} batch {number}: {e:#}"));
                        continue;
                    }
                }
            }

            if let Some(first) = rejected.first() {
                warn!(%collection, batch = number, rejected = rejected.len(), "documents rejected");
                out.errors.push(format!(
                    "{collection} batch {number}: {} of {attempted} documents rejected: {first}",
                    rejected.len()
                ));
            }
        }
        info!(%collection, inserted = total, "collection restored");
        total
    }
}

impl CollectionOutcome {
    fn new(collection: Collection) -> Self {
        Self {
            collection,
            restored: None,
            progress: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn failed(mut self, error: String) -> Self {
        self.restored = Some(0);
        self.errors.push(error);
        self.progress.push(format!("{}: failed", self.collection));
        self
    }
}

fn fold_outcomes(outcomes: Vec<CollectionOutcome>, backup: &BackupDocument) -> RestoreSummary {
    let mut restored = BTreeMap::new();
    let mut errors = Vec::new();
    let mut progress = Vec::new();
    for outcome in outcomes {
        if let Some(count) = outcome.restored {
            restored.insert(outcome.collection.name().to_owned(), count);
        }
        errors.extend(outcome.errors);
        progress.extend(outcome.progress);
    }
    RestoreSummary::new(restored, errors, progress, backup.origin())
}

fn export_record(collection: Collection, mut doc: Document) -> Json {
    if collection.strips_credentials() {
        strip_credentials(&mut doc);
    }
    if let Some(id) = doc.get(ID_FIELD) {
        let id = id_display(id);
        doc.insert(ID_FIELD.to_owned(), Value::String(id));
    }
    document_to_export_json(&doc)
}

fn prepare(records: &[Json]) -> Vec<Prepared> {
    records
        .iter()
        .cloned()
        .map(|json| {
            let mut doc = document_from_json(json).map_err(|e| e.to_string())?;
            parse_timestamp_fields(&mut doc);
            Ok(doc)
        })
        .collect()
}

/// The de-duplication key of a record; null and empty strings count as absent.
fn merge_key<'a>(doc: &'a Document, key: &str) -> Option<&'a Value> {
    match doc.get(key)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        value => Some(value),
    }
}

fn key_fingerprint(value: &Value) -> String {
    value.to_extended_json().to_string()
}

fn into_batches<T>(mut items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let mut batches = Vec::new();
    while items.len() > size {
        let rest = items.split_off(size);
        batches.push(std::mem::replace(&mut items, rest));
    }
    if !items.is_empty() {
        batches.push(items);
    }
    batches
}
