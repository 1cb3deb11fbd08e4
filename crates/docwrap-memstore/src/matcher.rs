//! Filter evaluation and ordering for in-memory documents.
//!
//! Supports the query subset docwrap itself relies on: field equality
//! (with array membership), `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`,
//! `$in`, `$nin`, `$exists`, `$regex`, and top-level `$and` / `$or`.
//! Field names may be dotted paths into embedded objects.

use std::cmp::Ordering;

use docwrap_core::{DriverError, SortKey, SortOrder};
use regex::Regex;
use serde_json::{Map, Value};

/// Resolve a dotted path inside a document.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |value, segment| match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Whether `doc` satisfies `filter`.
pub fn matches(doc: &Value, filter: &Value) -> Result<bool, DriverError> {
    let Value::Object(clauses) = filter else {
        return Err(DriverError::Operation(format!(
            "filter must be an object, got {filter}"
        )));
    };

    for (key, condition) in clauses {
        let ok = match key.as_str() {
            "$and" => all_of(doc, condition)?,
            "$or" => any_of(doc, condition)?,
            field => field_matches(lookup(doc, field), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clause_list<'a>(op: &str, condition: &'a Value) -> Result<&'a Vec<Value>, DriverError> {
    condition
        .as_array()
        .ok_or_else(|| DriverError::Operation(format!("{op} needs an array")))
}

fn all_of(doc: &Value, condition: &Value) -> Result<bool, DriverError> {
    for clause in clause_list("$and", condition)? {
        if !matches(doc, clause)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_of(doc: &Value, condition: &Value) -> Result<bool, DriverError> {
    for clause in clause_list("$or", condition)? {
        if matches(doc, clause)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_operator_object(condition: &Value) -> Option<&Map<String, Value>> {
    match condition {
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => {
            Some(map)
        }
        _ => None,
    }
}

fn field_matches(value: Option<&Value>, condition: &Value) -> Result<bool, DriverError> {
    let Some(operators) = is_operator_object(condition) else {
        return Ok(equals(value, condition));
    };

    for (op, operand) in operators {
        let ok = match op.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$gt" => compares(value, operand, |o| o == Ordering::Greater),
            "$gte" => compares(value, operand, |o| o != Ordering::Less),
            "$lt" => compares(value, operand, |o| o == Ordering::Less),
            "$lte" => compares(value, operand, |o| o != Ordering::Greater),
            "$in" => clause_list("$in", operand)?
                .iter()
                .any(|candidate| equals(value, candidate)),
            "$nin" => !clause_list("$nin", operand)?
                .iter()
                .any(|candidate| equals(value, candidate)),
            "$exists" => value.is_some() == operand.as_bool().unwrap_or(true),
            "$regex" => regex_matches(value, operand)?,
            other => {
                return Err(DriverError::Operation(format!(
                    "unsupported operator {other}"
                )));
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn equals(value: Option<&Value>, expected: &Value) -> bool {
    match (value, expected) {
        (None, Value::Null) => true,
        (None, _) => false,
        (Some(Value::Array(items)), expected) if !expected.is_array() => {
            items.iter().any(|item| same(item, expected))
        }
        (Some(actual), expected) => same(actual, expected),
    }
}

/// Equality that treats `1` and `1.0` as the same number.
fn same(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compares(value: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let Some(value) = value else {
        return false;
    };
    let ordering = match (value, operand) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    };
    ordering.is_some_and(accept)
}

fn regex_matches(value: Option<&Value>, pattern: &Value) -> Result<bool, DriverError> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| DriverError::Operation("$regex needs a string".to_string()))?;
    let re = Regex::new(pattern)
        .map_err(|e| DriverError::Operation(format!("invalid $regex {pattern:?}: {e}")))?;
    Ok(value.and_then(Value::as_str).is_some_and(|s| re.is_match(s)))
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order over optional values: missing/null first, then by type, then by value.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Order two documents by a list of sort keys.
pub fn compare_documents(a: &Value, b: &Value, sort: &[SortKey]) -> Ordering {
    for key in sort {
        let ordering = compare_values(lookup(a, &key.field), lookup(b, &key.field));
        let ordering = match key.order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "tag": 42,
            "name": "widget",
            "colors": ["red", "blue"],
            "embedded": { "size": 1000 },
        })
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(matches(&doc(), &json!({})).unwrap());
    }

    #[test]
    fn plain_equality() {
        assert!(matches(&doc(), &json!({"name": "widget"})).unwrap());
        assert!(!matches(&doc(), &json!({"name": "gadget"})).unwrap());
        assert!(matches(&doc(), &json!({"tag": 42.0})).unwrap());
    }

    #[test]
    fn equality_on_array_means_membership() {
        assert!(matches(&doc(), &json!({"colors": "red"})).unwrap());
        assert!(!matches(&doc(), &json!({"colors": "green"})).unwrap());
    }

    #[test]
    fn dotted_paths() {
        assert!(matches(&doc(), &json!({"embedded.size": {"$gte": 1000}})).unwrap());
        assert!(!matches(&doc(), &json!({"embedded.size": {"$gt": 1000}})).unwrap());
        assert_eq!(lookup(&doc(), "colors.1"), Some(&json!("blue")));
    }

    #[test]
    fn range_operators() {
        assert!(matches(&doc(), &json!({"tag": {"$gt": 41, "$lte": 42}})).unwrap());
        assert!(!matches(&doc(), &json!({"tag": {"$lt": 42}})).unwrap());
        assert!(!matches(&doc(), &json!({"missing": {"$gt": 0}})).unwrap());
    }

    #[test]
    fn set_operators() {
        assert!(matches(&doc(), &json!({"tag": {"$in": [1, 42]}})).unwrap());
        assert!(matches(&doc(), &json!({"tag": {"$nin": [1, 2]}})).unwrap());
        assert!(matches(&doc(), &json!({"tag": {"$ne": 7}})).unwrap());
    }

    #[test]
    fn exists_operator() {
        assert!(matches(&doc(), &json!({"name": {"$exists": true}})).unwrap());
        assert!(matches(&doc(), &json!({"nope": {"$exists": false}})).unwrap());
    }

    #[test]
    fn regex_operator() {
        assert!(matches(&doc(), &json!({"name": {"$regex": "^wid"}})).unwrap());
        assert!(matches(&doc(), &json!({"name": {"$regex": "("}})).is_err());
    }

    #[test]
    fn logical_operators() {
        let filter = json!({"$or": [{"tag": 1}, {"name": "widget"}]});
        assert!(matches(&doc(), &filter).unwrap());
        let filter = json!({"$and": [{"tag": 42}, {"name": "gadget"}]});
        assert!(!matches(&doc(), &filter).unwrap());
    }

    #[test]
    fn unknown_operator_errors() {
        assert!(matches(&doc(), &json!({"tag": {"$near": 1}})).is_err());
        assert!(matches(&doc(), &json!([1, 2])).is_err());
    }

    #[test]
    fn sort_multiple_keys() {
        let a = json!({"group": 1, "tag": 5});
        let b = json!({"group": 1, "tag": 3});
        let c = json!({"group": 0, "tag": 9});
        let sort = vec![SortKey::asc("group"), SortKey::desc("tag")];
        let mut docs = vec![b.clone(), c.clone(), a.clone()];
        docs.sort_by(|x, y| compare_documents(x, y, &sort));
        assert_eq!(docs, vec![c, a, b]);
    }

    #[test]
    fn missing_fields_sort_first() {
        assert_eq!(
            compare_values(None, Some(&json!(0))),
            Ordering::Less
        );
    }
}
