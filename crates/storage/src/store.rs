use anyhow::Result;
use shop_backup_core::{Document, Value};

/// Record selector understood by every store.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Filter::Eq(field.into(), value)
    }

    pub fn any_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In(field.into(), values)
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, expected) => doc.get(field) == Some(expected),
            Filter::In(field, candidates) => doc.get(field).is_some_and(|v| candidates.contains(v)),
        }
    }
}

/// A record the store refused during an unordered insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    pub index: usize,
    pub message: String,
}

/// Result of an unordered bulk insert. Rejected records do not stop the
/// remaining ones from being written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertManyOutcome {
    pub inserted: u64,
    pub failures: Vec<WriteFailure>,
}

/// Schema-less document storage, addressed by collection name.
///
/// Every record carries a unique `_id` within its collection; records
/// inserted without one get a fresh object id. Each call is atomic on its
/// own, nothing spans calls.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>>;

    /// Unordered insert. `Err` only when the store could not attempt the
    /// batch at all; per-record rejections are reported in the outcome.
    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<InsertManyOutcome>;

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64>;

    async fn count_documents(&self, collection: &str, filter: &Filter) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(order_id: &str) -> Document {
        let mut doc = Document::new();
        doc.insert("orderId".into(), Value::String(order_id.into()));
        doc
    }

    #[test]
    fn filters_match_by_field_value() {
        let doc = order("ORD-1");
        assert!(Filter::All.matches(&doc));
        assert!(Filter::eq("orderId", Value::String("ORD-1".into())).matches(&doc));
        assert!(!Filter::eq("orderId", Value::String("ORD-2".into())).matches(&doc));
        assert!(Filter::any_of(
            "orderId",
            vec![Value::String("ORD-2".into()), Value::String("ORD-1".into())]
        )
        .matches(&doc));
        assert!(!Filter::any_of("userId", vec![Value::Null]).matches(&doc));
    }
}
