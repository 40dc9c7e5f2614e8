//! Canonical records: the schema-stable unit handed to storage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::Strategy;

/// Declared type of a canonical field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Integer,
    Number,
    List,
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::Integer(_) => FieldKind::Integer,
            FieldValue::Number(_) => FieldKind::Number,
            FieldValue::List(_) => FieldKind::List,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }
}

/// Normalized fields keyed by canonical name, in stable order.
pub type Fields = BTreeMap<String, FieldValue>;

/// Which strategy produced the record and what it cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub strategy: Strategy,
    /// Attempts used for this target, across both strategies.
    pub attempts: u32,
    pub source_url: String,
}

/// The normalized output for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub target_id: String,
    pub fields: Fields,
    pub provenance: Provenance,
}

impl CanonicalRecord {
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_text)
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(FieldValue::as_integer)
    }

    pub fn list(&self, key: &str) -> &[String] {
        self.get(key).and_then(FieldValue::as_list).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_plain_values() {
        let mut fields = Fields::new();
        fields.insert("name".into(), FieldValue::Text("Goku".into()));
        fields.insert("power_level".into(), FieldValue::Integer(9001));
        fields.insert(
            "techniques".into(),
            FieldValue::List(vec!["Kamehameha".into()]),
        );
        let record = CanonicalRecord {
            target_id: "goku".into(),
            fields,
            provenance: Provenance {
                strategy: Strategy::Lightweight,
                attempts: 1,
                source_url: "https://dragonball.fandom.com/wiki/Goku".into(),
            },
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["fields"]["name"], "Goku");
        assert_eq!(json["fields"]["power_level"], 9001);
        assert_eq!(json["provenance"]["strategy"], "lightweight");

        let back: CanonicalRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.integer("power_level"), Some(9001));
        assert_eq!(back.list("techniques"), ["Kamehameha"]);
        assert!(back.list("affiliations").is_empty());
    }
}
