use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{BitsyError, EdgeId, Result, VertexId};

/// Property value stored on a vertex or edge.
///
/// Serialized untagged so the on-disk JSON stays a plain scalar or array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Ordered list of values.
    Array(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Canonical text form used as an index key. Distinct values map to
    /// distinct keys; `0.0` and `-0.0` share one.
    pub fn index_key(&self) -> String {
        let mut key = String::new();
        self.push_index_key(&mut key);
        key
    }

    fn push_index_key(&self, out: &mut String) {
        match self {
            PropertyValue::Bool(v) => out.push_str(if *v { "b1" } else { "b0" }),
            PropertyValue::Int(v) => {
                out.push('i');
                out.push_str(&v.to_string());
                out.push(';');
            }
            PropertyValue::Float(v) => {
                let v = if *v == 0.0 { 0.0f64 } else { *v };
                out.push('f');
                out.push_str(&format!("{:016x}", v.to_bits()));
            }
            PropertyValue::Str(v) => {
                out.push('s');
                out.push_str(&v.len().to_string());
                out.push(':');
                out.push_str(v);
            }
            PropertyValue::Array(items) => {
                out.push('a');
                out.push_str(&items.len().to_string());
                out.push(':');
                for item in items {
                    item.push_index_key(out);
                }
            }
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::Str(v) => write!(f, "{v}"),
            PropertyValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int(v.into())
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Str(v.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Str(v)
    }
}

/// Property map keyed by property name.
pub type Properties = BTreeMap<String, PropertyValue>;

/// Lifecycle of an element value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ElementState {
    /// Committed state as read from the store.
    Unmodified,
    /// Created or changed by a transaction.
    Modified,
    /// Removed by a transaction.
    Deleted,
}

impl ElementState {
    /// Returns `true` for [`ElementState::Deleted`].
    pub fn is_deleted(self) -> bool {
        self == ElementState::Deleted
    }
}

/// Which element family an index or lookup targets.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementKind {
    /// Vertices.
    Vertex,
    /// Edges.
    Edge,
}

impl ElementKind {
    /// Numeric code used in index records.
    pub fn code(self) -> u8 {
        match self {
            ElementKind::Vertex => 0,
            ElementKind::Edge => 1,
        }
    }

    /// Parses a numeric index-record code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ElementKind::Vertex),
            1 => Some(ElementKind::Edge),
            _ => None,
        }
    }
}

/// A vertex value.
#[derive(Clone, Debug, PartialEq)]
pub struct VertexRecord {
    /// Identifier.
    pub id: VertexId,
    /// Optional label.
    pub label: Option<String>,
    /// Properties.
    pub properties: Properties,
    /// Version; 1 on creation, incremented by every committed change.
    pub version: u64,
    /// Lifecycle state.
    pub state: ElementState,
}

impl VertexRecord {
    /// A brand-new vertex at version 1.
    pub fn new(id: VertexId, label: Option<String>) -> Self {
        Self {
            id,
            label,
            properties: Properties::new(),
            version: 1,
            state: ElementState::Modified,
        }
    }

    /// Looks up a property.
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}

/// An edge value. Endpoints never change after creation.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeRecord {
    /// Identifier.
    pub id: EdgeId,
    /// Label; non-empty and never starting with `~`.
    pub label: String,
    /// Source vertex.
    pub out_vertex: VertexId,
    /// Target vertex.
    pub in_vertex: VertexId,
    /// Properties.
    pub properties: Properties,
    /// Version; 1 on creation, incremented by every committed change.
    pub version: u64,
    /// Lifecycle state.
    pub state: ElementState,
}

impl EdgeRecord {
    /// A brand-new edge at version 1.
    pub fn new(id: EdgeId, label: String, out_vertex: VertexId, in_vertex: VertexId) -> Self {
        Self {
            id,
            label,
            out_vertex,
            in_vertex,
            properties: Properties::new(),
            version: 1,
            state: ElementState::Modified,
        }
    }

    /// Looks up a property.
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}

/// Rejects empty and reserved property keys.
pub fn validate_property_key(key: &str) -> Result<()> {
    match key {
        "" => Err(BitsyError::Invalid("property key must not be empty")),
        "id" => Err(BitsyError::Invalid("property key \"id\" is reserved")),
        "label" => Err(BitsyError::Invalid("property key \"label\" is reserved")),
        _ => Ok(()),
    }
}

/// Rejects values that cannot be written as JSON (non-finite floats).
pub fn validate_property_value(value: &PropertyValue) -> Result<()> {
    match value {
        PropertyValue::Float(v) if !v.is_finite() => {
            Err(BitsyError::Invalid("property value must be a finite number"))
        }
        PropertyValue::Array(items) => items.iter().try_for_each(validate_property_value),
        _ => Ok(()),
    }
}

/// Rejects empty edge labels and labels starting with `~`.
pub fn validate_edge_label(label: &str) -> Result<()> {
    if label.is_empty() {
        return Err(BitsyError::Invalid("edge label must not be empty"));
    }
    if label.starts_with('~') {
        return Err(BitsyError::InvalidOwned(format!(
            "edge label {label:?} must not start with '~'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_values_keep_json_shape() {
        let mut props = Properties::new();
        props.insert("age".into(), 42.into());
        props.insert("score".into(), 1.5.into());
        props.insert("name".into(), "ada".into());
        props.insert(
            "tags".into(),
            PropertyValue::Array(vec![true.into(), "x".into()]),
        );
        let json = serde_json::to_string(&props).unwrap();
        assert_eq!(
            json,
            r#"{"age":42,"name":"ada","score":1.5,"tags":[true,"x"]}"#
        );
        let back: Properties = serde_json::from_str(&json).unwrap();
        assert_eq!(back, props);
    }

    #[test]
    fn integral_json_number_decodes_as_int() {
        let v: PropertyValue = serde_json::from_str("7").unwrap();
        assert_eq!(v, PropertyValue::Int(7));
        let v: PropertyValue = serde_json::from_str("7.0").unwrap();
        assert_eq!(v, PropertyValue::Float(7.0));
    }

    #[test]
    fn reserved_keys_and_labels_rejected() {
        assert!(validate_property_key("").is_err());
        assert!(validate_property_key("id").is_err());
        assert!(validate_property_key("label").is_err());
        assert!(validate_property_key("name").is_ok());
        assert!(validate_edge_label("").is_err());
        assert!(validate_edge_label("~hidden").is_err());
        assert!(validate_edge_label("knows").is_ok());
    }

    #[test]
    fn index_keys_separate_distinct_values() {
        let pairs = [
            (PropertyValue::Int(1), PropertyValue::Float(1.0)),
            (PropertyValue::Int(1), PropertyValue::Str("1".into())),
            (PropertyValue::Bool(true), PropertyValue::Str("true".into())),
            (
                PropertyValue::Array(vec!["a".into(), "b".into()]),
                PropertyValue::Array(vec!["a3:b".into()]),
            ),
            (
                PropertyValue::Array(vec![PropertyValue::Int(1), PropertyValue::Int(2)]),
                PropertyValue::Array(vec![PropertyValue::Int(12)]),
            ),
        ];
        for (left, right) in pairs {
            assert_ne!(left.index_key(), right.index_key(), "{left:?} vs {right:?}");
        }
        assert_eq!(
            PropertyValue::Float(0.0).index_key(),
            PropertyValue::Float(-0.0).index_key()
        );
        assert_eq!(PropertyValue::from("x").index_key(), PropertyValue::from("x").index_key());
    }
}
