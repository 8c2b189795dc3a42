//! Equality-only conditions attached to rules and policies.
//!
//! Stored as a JSON object (`{"type": "X"}`). Empty values mean "no
//! constraint" for that key. Text that does not parse is kept verbatim as
//! `Condition::Malformed` so operators can see it; a malformed condition
//! never matches anything.

use crate::{fields::Attribute, model::DataRow};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionClause {
    pub key:   String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Clauses sorted by key. Empty matches every row.
    Clauses(Vec<ConditionClause>),
    Malformed { raw: String },
}

impl Default for Condition {
    fn default() -> Self {
        Condition::Clauses(Vec::new())
    }
}

impl Condition {
    pub fn always() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let mut clauses: Vec<ConditionClause> = pairs
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| ConditionClause { key: k.to_string(), value: v.to_string() })
            .collect();
        clauses.sort_by(|a, b| a.key.cmp(&b.key));
        Condition::Clauses(clauses)
    }

    /// Parse stored condition text. Missing or blank text is unconstrained.
    pub fn parse(stored: Option<&str>) -> Self {
        let text = match stored.map(str::trim) {
            None | Some("") => return Self::always(),
            Some(t) => t,
        };
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::from_json(&value)
                .unwrap_or_else(|| Condition::Malformed { raw: text.to_string() }),
            Err(e) => {
                log::warn!("Malformed condition text {text:?}: {e}");
                Condition::Malformed { raw: text.to_string() }
            }
        }
    }

    fn from_json(value: &Value) -> Option<Self> {
        let map = match value {
            Value::Null => return Some(Self::always()),
            Value::Object(map) => map,
            _ => return None,
        };
        let mut clauses = Vec::with_capacity(map.len());
        for (key, v) in map {
            let literal = match v {
                Value::Null => continue,
                Value::String(s) if s.is_empty() => continue,
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Array(_) | Value::Object(_) => return None,
            };
            clauses.push(ConditionClause { key: key.clone(), value: literal });
        }
        clauses.sort_by(|a, b| a.key.cmp(&b.key));
        Some(Condition::Clauses(clauses))
    }

    pub fn is_unconstrained(&self) -> bool {
        matches!(self, Condition::Clauses(c) if c.is_empty())
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Condition::Malformed { .. })
    }

    /// Every clause must name a known attribute and equal the row's value.
    pub fn matches(&self, row: &DataRow) -> bool {
        match self {
            Condition::Malformed { .. } => false,
            Condition::Clauses(clauses) => clauses.iter().all(|c| {
                Attribute::from_key(&c.key)
                    .map(|attr| row.attribute(attr) == c.value)
                    .unwrap_or(false)
            }),
        }
    }

    /// Text for the store's condition column.
    pub fn to_stored(&self) -> Option<String> {
        match self {
            Condition::Malformed { raw } => Some(raw.clone()),
            Condition::Clauses(c) if c.is_empty() => None,
            Condition::Clauses(_) => Some(self.to_json().to_string()),
        }
    }

    fn to_json(&self) -> Value {
        let mut map = Map::new();
        match self {
            Condition::Clauses(clauses) => {
                for c in clauses {
                    map.insert(c.key.clone(), Value::String(c.value.clone()));
                }
            }
            Condition::Malformed { raw } => {
                map.insert("_parseError".into(), Value::Bool(true));
                map.insert("raw".into(), Value::String(raw.clone()));
            }
        }
        Value::Object(map)
    }
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if value.get("_parseError").and_then(Value::as_bool) == Some(true) {
            let raw = value
                .get("raw")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Ok(Condition::Malformed { raw });
        }
        Ok(Self::from_json(&value)
            .unwrap_or_else(|| Condition::Malformed { raw: value.to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(row_type: &str) -> DataRow {
        let mut r = DataRow::empty(1, "P1");
        r.row_type = row_type.into();
        r
    }

    #[test]
    fn blank_text_is_unconstrained() {
        assert!(Condition::parse(None).is_unconstrained());
        assert!(Condition::parse(Some("   ")).is_unconstrained());
        assert!(Condition::parse(Some("{}")).is_unconstrained());
        assert!(Condition::parse(Some(r#"{"type": ""}"#)).is_unconstrained());
        assert!(Condition::parse(Some(r#"{"type": null}"#)).is_unconstrained());
    }

    #[test]
    fn malformed_text_keeps_original_string() {
        let cond = Condition::parse(Some("{bad json"));
        assert_eq!(cond, Condition::Malformed { raw: "{bad json".into() });

        let json = serde_json::to_value(&cond).unwrap();
        assert_eq!(json["_parseError"], Value::Bool(true));
        assert_eq!(json["raw"], Value::String("{bad json".into()));

        let back: Condition = serde_json::from_value(json).unwrap();
        assert_eq!(back, cond);
        assert_eq!(back.to_stored().as_deref(), Some("{bad json"));
    }

    #[test]
    fn non_object_json_is_malformed() {
        assert!(Condition::parse(Some("[1,2]")).is_malformed());
        assert!(Condition::parse(Some("\"type=X\"")).is_malformed());
        assert!(Condition::parse(Some(r#"{"type": ["X"]}"#)).is_malformed());
    }

    #[test]
    fn matching_requires_every_clause() {
        let cond = Condition::parse(Some(r#"{"type": "X", "pid": "P1"}"#));
        assert!(cond.matches(&row("X")));
        assert!(!cond.matches(&row("Y")));
        assert!(Condition::always().matches(&row("Y")));
    }

    #[test]
    fn unknown_keys_and_malformed_never_match() {
        assert!(!Condition::from_pairs(&[("colour", "red")]).matches(&row("X")));
        assert!(!Condition::parse(Some("{bad json")).matches(&row("X")));
    }

    #[test]
    fn numbers_compare_as_literals() {
        let cond = Condition::parse(Some(r#"{"region": 7}"#));
        let mut r = row("X");
        r.region = "7".into();
        assert!(cond.matches(&r));
    }
}
