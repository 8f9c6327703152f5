// JSON <-> BSON conversion for payloads that arrive as text.
//
// The shell-style ingestion path accepts minified JSON with the extended
// forms `{"$oid": "..."}` and `{"$date": <millis>}`.  Conversion is manual;
// the bson crate's serde integration is not enabled in this build.

use bson::oid::ObjectId;
use bson::{Bson, Document};
use serde_json::Value;

use crate::error::{Result, ServiceError};

pub fn to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i >= i64::from(i32::MIN) && i <= i64::from(i32::MAX) {
                    Bson::Int32(i as i32)
                } else {
                    Bson::Int64(i)
                }
            } else {
                Bson::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(to_bson).collect()),
        Value::Object(map) => {
            // extended JSON escapes for the two types the wire cares about
            if map.len() == 1 {
                if let Some(Value::String(hex)) = map.get("$oid") {
                    if let Ok(oid) = ObjectId::parse_str(hex) {
                        return Bson::ObjectId(oid);
                    }
                }
                if let Some(millis) = map.get("$date").and_then(Value::as_i64) {
                    return Bson::DateTime(bson::DateTime::from_millis(millis));
                }
            }
            let mut doc = Document::new();
            for (key, item) in map {
                doc.insert(key.clone(), to_bson(item));
            }
            Bson::Document(doc)
        }
    }
}

pub fn to_json(value: &Bson) -> Value {
    match value {
        Bson::Double(v) => serde_json::json!(v),
        Bson::String(v) => serde_json::json!(v),
        Bson::Array(items) => Value::Array(items.iter().map(to_json).collect()),
        Bson::Document(doc) => document_to_json(doc),
        Bson::Boolean(v) => serde_json::json!(v),
        Bson::Null => Value::Null,
        Bson::Int32(v) => serde_json::json!(v),
        Bson::Int64(v) => serde_json::json!(v),
        Bson::ObjectId(oid) => serde_json::json!({ "$oid": oid.to_hex() }),
        Bson::DateTime(dt) => serde_json::json!({ "$date": dt.timestamp_millis() }),
        other => serde_json::json!(format!("{:?}", other)),
    }
}

pub fn document_to_json(doc: &Document) -> Value {
    let mut map = serde_json::Map::new();
    for (key, value) in doc.iter() {
        let key: &str = key.as_ref();
        map.insert(key.to_string(), to_json(value));
    }
    Value::Object(map)
}

/// Parse a JSON object into a BSON document.
pub fn parse_document(payload: &str) -> Result<Document> {
    let value: Value = serde_json::from_str(payload)?;
    match to_bson(&value) {
        Bson::Document(doc) => Ok(doc),
        _ => Err(ServiceError::InvalidRequest(
            "payload is not a JSON object".to_string(),
        )),
    }
}

/// Compact rendering of a document for log lines.
pub fn json_str(doc: &Document) -> String {
    document_to_json(doc).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_extended_json() {
        let doc = parse_document(
            r#"{"_id":{"$oid":"5f35e5e1e799c52186039122"},"count":3,"when":{"$date":1681237539583}}"#,
        )
        .unwrap();

        assert!(matches!(doc.get("_id"), Some(Bson::ObjectId(_))));
        assert_eq!(doc.get("count"), Some(&Bson::Int32(3)));
        assert!(matches!(doc.get("when"), Some(Bson::DateTime(_))));
    }

    #[test]
    fn round_trips_plain_values() {
        let doc = parse_document(r#"{"name":"abc","nested":{"flag":true},"items":[1,2.5]}"#)
            .unwrap();
        let json = document_to_json(&doc);
        assert_eq!(json["name"], "abc");
        assert_eq!(json["nested"]["flag"], true);
        assert_eq!(json["items"][1], 2.5);
    }

    #[test]
    fn rejects_non_object_payloads() {
        assert!(parse_document("[1,2,3]").is_err());
        assert!(parse_document("not json").is_err());
    }
}
