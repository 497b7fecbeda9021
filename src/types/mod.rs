//! Document model shared by the driver layer, the planner and the task graph.

mod object_id;
mod order;

pub use object_id::ObjectId;
pub use order::{compare_values, type_alias, type_rank, OrderedValue, TYPE_ALIASES};
pub use serde_json::Value;

/// A single database document: a JSON object keyed by field name.
pub type Document = serde_json::Map<String, Value>;

/// Name of the identifier field every document carries.
pub const ID_FIELD: &str = "_id";

/// Returns the identifier of `doc`, if it has one.
pub fn document_id(doc: &Document) -> Option<&Value> {
    doc.get(ID_FIELD)
}

/// Builds a [`Document`] from a JSON value, rejecting anything but objects.
pub fn into_document(value: Value) -> crate::Result<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(crate::DocbagError::invalid(format!(
            "expected a JSON object, found {other}"
        ))),
    }
}
