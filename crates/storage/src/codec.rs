use std::future::Future;

use anyhow::{Context, Result};
use shop_backup_core::{document_from_extended_json, document_to_extended_json, Document, Value, ID_FIELD};
use uuid::Uuid;

use crate::store::{InsertManyOutcome, WriteFailure};

/// A record ready to be written: its key column and its extended-JSON body.
pub(crate) struct EncodedDocument {
    pub key: String,
    pub display_id: String,
    pub body: String,
}

/// Assigns an object id when the record has none, then encodes it.
pub(crate) fn encode_for_insert(mut doc: Document) -> Result<EncodedDocument> {
    let id = doc
        .entry(ID_FIELD.to_owned())
        .or_insert_with(|| Value::ObjectId(Uuid::new_v4()))
        .clone();
    let key = serde_json::to_string(&id.to_extended_json()).context("encode document id")?;
    let body = serde_json::to_string(&document_to_extended_json(&doc)).context("encode document")?;
    Ok(EncodedDocument {
        key,
        display_id: id_display(&id),
        body,
    })
}

/// Writes records one at a time. `write` returns `Ok(false)` when the id is
/// already taken; an error fails that record only and the rest still run.
pub(crate) async fn insert_each<F, Fut>(docs: Vec<Document>, mut write: F) -> InsertManyOutcome
where
    F: FnMut(EncodedDocument) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
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
        let display_id = encoded.display_id.clone();
        match write(encoded).await {
            Ok(true) => outcome.inserted += 1,
            Ok(false) => outcome.failures.push(WriteFailure {
                index,
                message: format!("duplicate key: _id {display_id} already exists"),
            }),
            Err(e) => outcome.failures.push(WriteFailure {
                index,
                message: format!("_id {display_id}: {e:#}"),
            }),
        }
    }
    outcome
}

pub(crate) fn decode_body(raw: &str) -> Result<Document> {
    let json = serde_json::from_str(raw).context("parse stored document")?;
    document_from_extended_json(json).context("decode stored document")
}

pub(crate) fn id_display(id: &Value) -> String {
    match id {
        Value::ObjectId(oid) => oid.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_export_json().to_string(),
    }
}
