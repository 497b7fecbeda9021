//! Evaluation of match filters against in-memory documents.
//!
//! Supports the query subset the bridge and its callers emit: implicit
//! equality, dotted paths, `$eq $ne $gt $gte $lt $lte $in $nin $exists $type $not`
//! on fields and `$and $or $nor` at the top level.

use std::cmp::Ordering;

use serde_json::Value;

use crate::error::{DocbagError, Result};
use crate::store::Filter;
use crate::types::{compare_values, type_alias, type_rank, Document, TYPE_ALIASES};

/// Returns whether `doc` satisfies `filter`.
pub fn matches(doc: &Document, filter: &Filter) -> Result<bool> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(condition, key)? {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(condition, key)? {
                    if matches(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in clauses(condition, key)? {
                    if matches(doc, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            op if op.starts_with('$') => {
                return Err(DocbagError::UnsupportedFilter(format!(
                    "top-level operator {op}"
                )))
            }
            path => field_matches(lookup(doc, path), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Resolves a dotted path inside `doc`.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn clauses<'a>(condition: &'a Value, op: &str) -> Result<Vec<&'a Filter>> {
    let items = condition
        .as_array()
        .ok_or_else(|| DocbagError::UnsupportedFilter(format!("{op} expects an array")))?;
    items
        .iter()
        .map(|item| {
            item.as_object()
                .ok_or_else(|| DocbagError::UnsupportedFilter(format!("{op} clauses must be objects")))
        })
        .collect()
}

fn operator_doc(condition: &Value) -> Option<&serde_json::Map<String, Value>> {
    match condition {
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => {
            Some(map)
        }
        _ => None,
    }
}

fn field_matches(value: Option<&Value>, condition: &Value) -> Result<bool> {
    let Some(ops) = operator_doc(condition) else {
        return Ok(equals(value, condition));
    };
    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$gt" => ordered(value, operand, |o| o == Ordering::Greater),
            "$gte" => ordered(value, operand, |o| o != Ordering::Less),
            "$lt" => ordered(value, operand, |o| o == Ordering::Less),
            "$lte" => ordered(value, operand, |o| o != Ordering::Greater),
            "$in" => in_list(value, operand, op)?,
            "$nin" => !in_list(value, operand, op)?,
            "$exists" => {
                let wanted = operand.as_bool().ok_or_else(|| {
                    DocbagError::UnsupportedFilter("$exists expects a boolean".into())
                })?;
                value.is_some() == wanted
            }
            "$type" => has_type(value, operand)?,
            "$not" => {
                if operator_doc(operand).is_none() {
                    return Err(DocbagError::UnsupportedFilter(
                        "$not expects an operator document".into(),
                    ));
                }
                !field_matches(value, operand)?
            }
            other => {
                return Err(DocbagError::UnsupportedFilter(format!(
                    "field operator {other}"
                )))
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn same(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b) && compare_values(a, b).is_eq()
}

fn equals(value: Option<&Value>, target: &Value) -> bool {
    match value {
        None => target.is_null(),
        Some(found) if same(found, target) => true,
        Some(Value::Array(items)) => items.iter().any(|item| same(item, target)),
        Some(_) => false,
    }
}

// Range comparisons only match values in the same type bracket.
fn ordered(value: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let check = |candidate: &Value| {
        type_rank(candidate) == type_rank(operand) && accept(compare_values(candidate, operand))
    };
    match value {
        None => false,
        Some(Value::Array(items)) if !operand.is_array() => items.iter().any(check),
        Some(found) => check(found),
    }
}

fn has_type(value: Option<&Value>, operand: &Value) -> Result<bool> {
    let wanted: Vec<&str> = match operand {
        Value::String(alias) => vec![alias.as_str()],
        Value::Array(aliases) => aliases.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    if wanted.is_empty() {
        return Err(DocbagError::UnsupportedFilter(
            "$type expects an alias or a list of aliases".into(),
        ));
    }
    if let Some(unknown) = wanted.iter().copied().find(|alias| !TYPE_ALIASES.contains(alias)) {
        return Err(DocbagError::UnsupportedFilter(format!("$type alias {unknown}")));
    }
    let check = |candidate: &Value| wanted.contains(&type_alias(candidate));
    Ok(match value {
        None => false,
        Some(found @ Value::Array(items)) => check(found) || items.iter().any(check),
        Some(found) => check(found),
    })
}

fn in_list(value: Option<&Value>, operand: &Value, op: &str) -> Result<bool> {
    let options = operand
        .as_array()
        .ok_or_else(|| DocbagError::UnsupportedFilter(format!("{op} expects an array")))?;
    Ok(options.iter().any(|target| equals(value, target)))
}
