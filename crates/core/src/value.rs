use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value as Json};
use uuid::Uuid;

use crate::error::InputError;
use crate::timestamp::{format_iso, parse_iso};

/// Wraps a stored object whose own keys start with `$`, so the store never
/// mistakes record content for a type tag.
const ESCAPE_TAG: &str = "$doc";

/// A stored record: field name to value.
pub type Document = BTreeMap<String, Value>;

/// Field value as held by the document store.
///
/// Unlike plain JSON, the store keeps a native object-id handle and a native
/// datetime. Both collapse to strings when a record leaves the store through
/// an export.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    ObjectId(Uuid),
    DateTime(DateTime<Utc>),
    Array(Vec<Value>),
    Document(Document),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Converts untyped JSON without interpreting any tags or strings.
    pub fn from_plain_json(json: Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => number_value(&n),
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from_plain_json).collect()),
            Json::Object(map) => Value::Document(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_plain_json(v)))
                    .collect(),
            ),
        }
    }

    /// JSON shape used in backup files: object ids and datetimes become
    /// strings at every depth.
    pub fn to_export_json(&self) -> Json {
        match self {
            Value::ObjectId(id) => Json::String(id.to_string()),
            Value::DateTime(dt) => Json::String(format_iso(*dt)),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_export_json).collect()),
            Value::Document(doc) => document_to_export_json(doc),
            other => scalar_json(other),
        }
    }

    /// Lossless JSON shape used by the persistent stores.
    pub fn to_extended_json(&self) -> Json {
        match self {
            Value::ObjectId(id) => tagged("$oid", id.to_string()),
            Value::DateTime(dt) => tagged("$date", format_iso(*dt)),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_extended_json).collect()),
            Value::Document(doc) => {
                let fields: Map<String, Json> = doc
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_extended_json()))
                    .collect();
                if doc.keys().any(|k| k.starts_with('$')) {
                    let mut wrapper = Map::new();
                    wrapper.insert(ESCAPE_TAG.to_owned(), Json::Object(fields));
                    Json::Object(wrapper)
                } else {
                    Json::Object(fields)
                }
            }
            other => scalar_json(other),
        }
    }

    pub fn from_extended_json(json: Json) -> Self {
        match json {
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from_extended_json).collect()),
            Json::Object(map) => {
                if let Some(value) = untag(&map) {
                    return value;
                }
                Value::Document(
                    unescape(map)
                        .into_iter()
                        .map(|(k, v)| (k, Value::from_extended_json(v)))
                        .collect(),
                )
            }
            other => Value::from_plain_json(other),
        }
    }
}

/// Builds a store record from one backup entry. Entries must be JSON objects.
pub fn document_from_json(json: Json) -> Result<Document, InputError> {
    match Value::from_plain_json(json) {
        Value::Document(doc) => Ok(doc),
        other => Err(InputError::NotAnObject(kind_name(&other))),
    }
}

pub fn document_to_export_json(doc: &Document) -> Json {
    Json::Object(
        doc.iter()
            .map(|(k, v)| (k.clone(), v.to_export_json()))
            .collect(),
    )
}

pub fn document_to_extended_json(doc: &Document) -> Json {
    Value::Document(doc.clone()).to_extended_json()
}

pub fn document_from_extended_json(json: Json) -> Result<Document, InputError> {
    match Value::from_extended_json(json) {
        Value::Document(doc) => Ok(doc),
        other => Err(InputError::NotAnObject(kind_name(&other))),
    }
}

fn number_value(n: &Number) -> Value {
    match n.as_i64() {
        Some(i) => Value::Int(i),
        None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
    }
}

fn scalar_json(value: &Value) -> Json {
    match value {
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Double(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Value::String(s) => Json::String(s.clone()),
        _ => Json::Null,
    }
}

fn tagged(tag: &str, body: String) -> Json {
    let mut map = Map::new();
    map.insert(tag.to_owned(), Json::String(body));
    Json::Object(map)
}

fn untag(map: &Map<String, Json>) -> Option<Value> {
    if map.len() != 1 {
        return None;
    }
    let (tag, body) = map.iter().next()?;
    let body = body.as_str()?;
    match tag.as_str() {
        "$oid" => Uuid::parse_str(body).ok().map(Value::ObjectId),
        "$date" => parse_iso(body).map(Value::DateTime),
        _ => None,
    }
}

fn unescape(map: Map<String, Json>) -> Map<String, Json> {
    if map.len() != 1 {
        return map;
    }
    match map.into_iter().next() {
        Some((tag, Json::Object(fields))) if tag == ESCAPE_TAG => fields,
        Some((tag, body)) => {
            let mut map = Map::new();
            map.insert(tag, body);
            map
        }
        None => Map::new(),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Int(_) | Value::Double(_) => "number",
        Value::String(_) | Value::ObjectId(_) | Value::DateTime(_) => "string",
        Value::Array(_) => "array",
        Value::Document(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-05T10:15:30Z")
            .expect("rfc3339")
            .with_timezone(&Utc)
    }

    #[test]
    fn export_json_flattens_ids_and_nested_datetimes() {
        let id = Uuid::new_v4();
        let mut item = Document::new();
        item.insert("shippedAt".into(), Value::DateTime(sample_time()));

        let mut doc = Document::new();
        doc.insert("_id".into(), Value::ObjectId(id));
        doc.insert("createdAt".into(), Value::DateTime(sample_time()));
        doc.insert("items".into(), Value::Array(vec![Value::Document(item)]));

        let out = document_to_export_json(&doc);
        assert_eq!(out["_id"], json!(id.to_string()));
        assert_eq!(out["createdAt"], json!("2024-03-05T10:15:30Z"));
        assert_eq!(out["items"][0]["shippedAt"], json!("2024-03-05T10:15:30Z"));
    }

    #[test]
    fn extended_json_keeps_native_types() {
        let id = Uuid::new_v4();
        let mut doc = Document::new();
        doc.insert("_id".into(), Value::ObjectId(id));
        doc.insert("createdAt".into(), Value::DateTime(sample_time()));
        doc.insert("name".into(), Value::String("Brake pads".into()));
        doc.insert("price".into(), Value::Double(129.5));
        doc.insert("stock".into(), Value::Int(4));

        let encoded = document_to_extended_json(&doc);
        assert_eq!(encoded["_id"], json!({"$oid": id.to_string()}));

        let decoded = document_from_extended_json(encoded).expect("decode");
        assert_eq!(decoded, doc);
    }

    #[test]
    fn plain_json_does_not_interpret_date_strings() {
        let doc = document_from_json(json!({"createdAt": "2024-03-05T10:15:30Z"})).expect("object");
        assert_eq!(doc["createdAt"], Value::String("2024-03-05T10:15:30Z".into()));
    }

    #[test]
    fn dollar_keyed_content_survives_storage_untouched() {
        let doc = document_from_json(json!({
            "_id": "c1",
            "meta": {"$date": "2024-01-01"},
            "ref": {"$oid": "not-a-uuid-but-still-content"},
            "nested": [{"$doc": {"$date": "2024-01-01"}}]
        }))
        .expect("object");

        let encoded = document_to_extended_json(&doc);
        assert_eq!(encoded["meta"], json!({"$doc": {"$date": "2024-01-01"}}));

        let decoded = document_from_extended_json(encoded).expect("decode");
        assert_eq!(decoded, doc);
        assert_eq!(document_to_export_json(&decoded)["meta"], json!({"$date": "2024-01-01"}));
    }

    #[test]
    fn non_object_records_are_rejected() {
        let err = document_from_json(json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("array"));
    }
}
