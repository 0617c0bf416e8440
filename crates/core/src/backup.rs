use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::collection::Collection;
use crate::error::InputError;

/// The JSON artifact produced by an export and consumed by a restore.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupDocument {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    pub collections: BackupCollections,
    /// Written on export, ignored on restore.
    #[serde(default, skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub stats: Option<BackupStats>,
}

/// Per-collection record lists. `None` means the key was absent, which a
/// restore treats differently from an empty list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BackupCollections {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<Json>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products: Option<Vec<Json>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<Json>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orders: Option<Vec<Json>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviews: Option<Vec<Json>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupStats {
    pub total_categories: u64,
    pub total_products: u64,
    pub total_users: u64,
    pub total_orders: u64,
    pub total_reviews: u64,
}

/// Restore request body. The backup travels as JSON text inside a JSON
/// string, the format the admin UI uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub backup_file: String,
}

/// Outcome of a restore.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RestoreSummary {
    pub success: bool,
    pub message: String,
    pub restored: BTreeMap<String, u64>,
    pub errors: Option<Vec<String>>,
    pub progress: Vec<String>,
    pub backup_info: BackupOrigin,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupOrigin {
    pub timestamp: Option<String>,
    pub database: Option<String>,
}

/// Live document counts, used to compare before and after a restore.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseInfo {
    pub database: String,
    pub timestamp: String,
    pub collections: BTreeMap<String, u64>,
    pub total_documents: u64,
}

impl BackupDocument {
    pub fn from_json_str(raw: &str) -> Result<Self, InputError> {
        let json: Json = serde_json::from_str(raw).map_err(InputError::InvalidJson)?;
        if json.get("collections").is_none() {
            return Err(InputError::MissingCollections);
        }
        serde_json::from_value(json).map_err(InputError::InvalidShape)
    }

    /// Pretty-printed UTF-8 bytes, non-ASCII left unescaped.
    pub fn to_pretty_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn file_name(&self) -> String {
        format!(
            "backup_{}_{}.json",
            self.database.as_deref().unwrap_or("database"),
            self.timestamp.as_deref().unwrap_or("unknown")
        )
    }

    pub fn origin(&self) -> BackupOrigin {
        BackupOrigin {
            timestamp: self.timestamp.clone(),
            database: self.database.clone(),
        }
    }
}

impl BackupCollections {
    pub fn get(&self, collection: Collection) -> Option<&[Json]> {
        match collection {
            Collection::Categories => self.categories.as_deref(),
            Collection::Products => self.products.as_deref(),
            Collection::Users => self.users.as_deref(),
            Collection::Orders => self.orders.as_deref(),
            Collection::Reviews => self.reviews.as_deref(),
        }
    }

    pub fn set(&mut self, collection: Collection, records: Vec<Json>) {
        let slot = match collection {
            Collection::Categories => &mut self.categories,
            Collection::Products => &mut self.products,
            Collection::Users => &mut self.users,
            Collection::Orders => &mut self.orders,
            Collection::Reviews => &mut self.reviews,
        };
        *slot = Some(records);
    }

    pub fn stats(&self) -> BackupStats {
        let len = |c| self.get(c).map_or(0, |records| records.len() as u64);
        BackupStats {
            total_categories: len(Collection::Categories),
            total_products: len(Collection::Products),
            total_users: len(Collection::Users),
            total_orders: len(Collection::Orders),
            total_reviews: len(Collection::Reviews),
        }
    }
}

impl RestoreRequest {
    /// Client side: embed a backup as JSON text.
    pub fn wrap(backup: &BackupDocument) -> serde_json::Result<Self> {
        Ok(Self {
            backup_file: serde_json::to_string(backup)?,
        })
    }

    /// Server side: unwrap a request body into a validated backup.
    pub fn decode(body: &[u8]) -> Result<BackupDocument, InputError> {
        let request: RestoreRequest = serde_json::from_slice(body).map_err(InputError::InvalidEnvelope)?;
        BackupDocument::from_json_str(&request.backup_file)
    }
}

impl RestoreSummary {
    /// Folds per-collection results into the response. Success means no
    /// errors at all.
    pub fn new(
        restored: BTreeMap<String, u64>,
        errors: Vec<String>,
        progress: Vec<String>,
        backup_info: BackupOrigin,
    ) -> Self {
        let mut message = "Backup restored successfully!".to_owned();
        if !errors.is_empty() {
            message.push_str(&format!(" With {} errors.", errors.len()));
        }
        Self {
            success: errors.is_empty(),
            message,
            restored,
            errors: if errors.is_empty() { None } else { Some(errors) },
            progress,
            backup_info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_collections_is_rejected() {
        let err = BackupDocument::from_json_str(r#"{"timestamp": "20240101_000000"}"#).unwrap_err();
        assert!(matches!(err, InputError::MissingCollections));
    }

    #[test]
    fn invalid_json_is_rejected() {
        let err = BackupDocument::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, InputError::InvalidJson(_)));
    }

    #[test]
    fn wrong_shape_is_rejected() {
        let err = BackupDocument::from_json_str(r#"{"collections": {"products": 3}}"#).unwrap_err();
        assert!(matches!(err, InputError::InvalidShape(_)));
    }

    #[test]
    fn absent_and_empty_collections_stay_distinct() {
        let doc = BackupDocument::from_json_str(r#"{"collections": {"categories": []}, "stats": {"bogus": 1}}"#)
            .expect("parse");
        assert!(doc.stats.is_none());
        assert_eq!(doc.collections.get(Collection::Categories), Some(&[][..]));
        assert_eq!(doc.collections.get(Collection::Products), None);
    }

    #[test]
    fn envelope_roundtrip_preserves_non_ascii() {
        let mut collections = BackupCollections::default();
        collections.set(Collection::Categories, vec![json!({"_id": "c1", "name": "Îmbrăcăminte"})]);
        let backup = BackupDocument {
            timestamp: Some("20240305_101530".into()),
            database: Some("r32_ecommerce".into()),
            stats: Some(collections.stats()),
            collections,
        };

        let pretty = String::from_utf8(backup.to_pretty_json().expect("serialize")).expect("utf8");
        assert!(pretty.contains("Îmbrăcăminte"));
        assert_eq!(backup.file_name(), "backup_r32_ecommerce_20240305_101530.json");

        let body = serde_json::to_vec(&RestoreRequest::wrap(&backup).expect("wrap")).expect("body");
        let decoded = RestoreRequest::decode(&body).expect("decode");
        assert_eq!(decoded.collections, backup.collections);
        assert_eq!(decoded.origin(), backup.origin());
    }

    #[test]
    fn envelope_without_backup_file_is_rejected() {
        let err = RestoreRequest::decode(br#"{"collections": {}}"#).unwrap_err();
        assert!(matches!(err, InputError::InvalidEnvelope(_)));
    }

    #[test]
    fn summary_reports_error_count() {
        let origin = BackupOrigin { timestamp: None, database: None };
        let ok = RestoreSummary::new(BTreeMap::new(), Vec::new(), Vec::new(), origin.clone());
        assert!(ok.success);
        assert!(ok.errors.is_none());

        let failed = RestoreSummary::new(BTreeMap::new(), vec!["products: boom".into()], Vec::new(), origin);
        assert!(!failed.success);
        assert!(failed.message.contains("1 errors"));
    }
}
