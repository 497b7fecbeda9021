use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DocbagError, Result};
use crate::types::Document;

/// Connection settings handed to a [`crate::store::Connector`].
///
/// The mapping is kept exactly as the caller built it; lookups in the
/// connection cache go through [`ConnectionConfig::key`] instead.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionConfig(Document);

impl ConnectionConfig {
    /// Empty configuration: the connector's defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces one setting.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Looks up a top-level setting.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Underlying mapping, as given by the caller.
    pub fn as_document(&self) -> &Document {
        &self.0
    }

    /// Whether no settings are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Normalized cache key for this configuration.
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey(FrozenValue::freeze_map(&self.0))
    }
}

impl From<Document> for ConnectionConfig {
    fn from(doc: Document) -> Self {
        Self(doc)
    }
}

impl From<HashMap<String, Value>> for ConnectionConfig {
    fn from(map: HashMap<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

impl From<BTreeMap<String, Value>> for ConnectionConfig {
    fn from(map: BTreeMap<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ConnectionConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl TryFrom<Value> for ConnectionConfig {
    type Error = DocbagError;

    fn try_from(value: Value) -> Result<Self> {
        crate::types::into_document(value).map(Self)
    }
}

impl TryFrom<toml::Table> for ConnectionConfig {
    type Error = DocbagError;

    fn try_from(table: toml::Table) -> Result<Self> {
        Self::try_from(serde_json::to_value(table)?)
    }
}

/// Immutable, order-insensitive form of a JSON value.
///
/// Mappings are sorted by key and sequences are frozen, so two structurally
/// equal values compare and hash equal regardless of how they were built.
/// Scalars keep their kind: an integer never equals a float.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FrozenValue {
    /// JSON null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Any integer representable by the source number.
    Int(i128),
    /// Float stored by bit pattern, with `-0.0` folded into `0.0`.
    Float(u64),
    /// String.
    Str(Box<str>),
    /// Frozen sequence.
    Seq(Box<[FrozenValue]>),
    /// Mapping sorted by key.
    Map(Box<[(Box<str>, FrozenValue)]>),
}

impl FrozenValue {
    /// Recursively freezes `value`.
    pub fn freeze(value: &Value) -> Self {
        match value {
            Value::Null => FrozenValue::Null,
            Value::Bool(b) => FrozenValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FrozenValue::Int(i128::from(i))
                } else if let Some(u) = n.as_u64() {
                    FrozenValue::Int(i128::from(u))
                } else {
                    let f = n.as_f64().unwrap_or_default();
                    let f = if f == 0.0 { 0.0 } else { f };
                    FrozenValue::Float(f.to_bits())
                }
            }
            Value::String(s) => FrozenValue::Str(s.as_str().into()),
            Value::Array(items) => FrozenValue::Seq(items.iter().map(Self::freeze).collect()),
            Value::Object(map) => Self::freeze_map(map),
        }
    }

    /// Freezes a mapping, sorting its entries by key.
    pub fn freeze_map(map: &Document) -> Self {
        let mut entries: Vec<(Box<str>, FrozenValue)> = map
            .iter()
            .map(|(k, v)| (k.as_str().into(), Self::freeze(v)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        FrozenValue::Map(entries.into_boxed_slice())
    }
}

impl fmt::Display for FrozenValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrozenValue::Null => f.write_str("null"),
            FrozenValue::Bool(b) => write!(f, "{b}"),
            FrozenValue::Int(i) => write!(f, "{i}"),
            FrozenValue::Float(bits) => write!(f, "{:?}", f64::from_bits(*bits)),
            FrozenValue::Str(s) => write!(f, "{s:?}"),
            FrozenValue::Seq(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            FrozenValue::Map(entries) => {
                f.write_str("{")?;
                for (idx, (k, v)) in entries.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{k:?}:{v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Hashable identity of a [`ConnectionConfig`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionKey(FrozenValue);

impl ConnectionKey {
    /// Frozen representation of the configuration.
    pub fn frozen(&self) -> &FrozenValue {
        &self.0
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
