//! Query evaluation over a point-in-time snapshot
//!
//! Applies a `QueryPlan` to records already copied out of the backend:
//! key selection (prefix, exact keys), the predicate tree, ordering, and
//! paging, in that order.
//!
//! Field predicates look inside values that decode as JSON objects. A field
//! is a dotted path, optionally starting with `$.`; a numeric segment also
//! indexes into arrays.

use std::cmp::Ordering;

use replikv_core::StoredRecord;
use replikv_query::{Clause, CompareOp, FieldValue, Filter, QueryPlan};
use serde_json::Value as Json;

/// Records selected by `plan`, in result order
pub fn evaluate(plan: &QueryPlan, records: Vec<StoredRecord>) -> Vec<StoredRecord> {
    let mut rows: Vec<Row> = records
        .into_iter()
        .filter(|record| plan.selects_key(record.key.as_bytes()))
        .map(Row::new)
        .filter(|row| {
            plan.filter
                .as_ref()
                .map_or(true, |filter| matches(filter, row.doc.as_ref()))
        })
        .collect();

    if let Some(ascending) = plan.order_by_write_time {
        rows.sort_by(|a, b| {
            let by_time = a.record.write_time.cmp(&b.record.write_time);
            let by_time = if ascending { by_time } else { by_time.reverse() };
            by_time.then_with(|| a.record.key.cmp(&b.record.key))
        });
    } else if !plan.order_by.is_empty() {
        // Stable sort keeps key order among equal field values.
        rows.sort_by(|a, b| {
            for (field, ascending) in &plan.order_by {
                let ordering = compare_for_sort(
                    lookup(a.doc.as_ref(), field),
                    lookup(b.doc.as_ref(), field),
                );
                let ordering = if *ascending { ordering } else { ordering.reverse() };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    let rows = rows.into_iter().map(|row| row.record);
    match plan.limit {
        Some((number, offset)) => rows.skip(offset).take(number).collect(),
        None => rows.collect(),
    }
}

struct Row {
    record: StoredRecord,
    doc: Option<Json>,
}

impl Row {
    fn new(record: StoredRecord) -> Self {
        let doc = serde_json::from_slice::<Json>(record.value.as_bytes())
            .ok()
            .filter(Json::is_object);
        Self { record, doc }
    }
}

/// Resolve a dotted field path inside a JSON object
pub fn lookup<'a>(doc: Option<&'a Json>, field: &str) -> Option<&'a Json> {
    let mut current = doc?;
    let path = field.strip_prefix("$.").unwrap_or(field);
    for segment in path.split('.') {
        current = match current {
            Json::Object(map) => map.get(segment)?,
            Json::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn present(value: Option<&Json>) -> Option<&Json> {
    value.filter(|v| !v.is_null())
}

fn matches(filter: &Filter, doc: Option<&Json>) -> bool {
    match filter {
        Filter::Leaf(clause) => matches_clause(clause, doc),
        Filter::And(children) => children.iter().all(|child| matches(child, doc)),
        Filter::Or(children) => children.iter().any(|child| matches(child, doc)),
    }
}

fn matches_clause(clause: &Clause, doc: Option<&Json>) -> bool {
    match clause {
        Clause::Compare { op, field, value } => {
            let Some(actual) = present(lookup(doc, field)) else {
                return false;
            };
            match op {
                CompareOp::NotEqual => !compare(CompareOp::Equal, actual, value),
                _ => compare(*op, actual, value),
            }
        }
        Clause::In { field, values } => present(lookup(doc, field))
            .map_or(false, |actual| one_of(actual, values)),
        Clause::NotIn { field, values } => present(lookup(doc, field))
            .map_or(false, |actual| !one_of(actual, values)),
        Clause::Like { field, pattern } => present(lookup(doc, field))
            .map_or(false, |actual| like_value(actual, pattern)),
        Clause::NotLike { field, pattern } => present(lookup(doc, field))
            .map_or(false, |actual| !like_value(actual, pattern)),
        Clause::IsNull { field } => present(lookup(doc, field)).is_none(),
        Clause::IsNotNull { field } => present(lookup(doc, field)).is_some(),
        // Connectors and modifiers never reach a leaf.
        _ => true,
    }
}

fn one_of(actual: &Json, values: &[FieldValue]) -> bool {
    values
        .iter()
        .any(|value| compare(CompareOp::Equal, actual, value))
}

fn like_value(actual: &Json, pattern: &str) -> bool {
    actual.as_str().map_or(false, |s| like(s, pattern))
}

/// Positive comparison of a JSON value against a typed literal
///
/// Type mismatches never match.
fn compare(op: CompareOp, actual: &Json, literal: &FieldValue) -> bool {
    let ordering = match literal {
        FieldValue::Integer(_) | FieldValue::Long(_) | FieldValue::Double(_) => {
            match (actual.as_f64(), literal.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            }
        }
        FieldValue::String(expected) => actual
            .as_str()
            .map(|a| a.as_bytes().cmp(expected.as_bytes())),
        FieldValue::Bool(expected) => actual.as_bool().map(|a| a.cmp(expected)),
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        CompareOp::Equal => ordering == Ordering::Equal,
        CompareOp::NotEqual => ordering != Ordering::Equal,
        CompareOp::Greater => ordering == Ordering::Greater,
        CompareOp::Less => ordering == Ordering::Less,
        CompareOp::GreaterOrEqual => ordering != Ordering::Less,
        CompareOp::LessOrEqual => ordering != Ordering::Greater,
    }
}

/// Total order used by `OrderBy`: missing/null < bool < number < string < other
fn compare_for_sort(a: Option<&Json>, b: Option<&Json>) -> Ordering {
    fn rank(v: Option<&Json>) -> u8 {
        match v {
            None | Some(Json::Null) => 0,
            Some(Json::Bool(_)) => 1,
            Some(Json::Number(_)) => 2,
            Some(Json::String(_)) => 3,
            Some(_) => 4,
        }
    }
    match (a, b) {
        (Some(Json::Bool(x)), Some(Json::Bool(y))) => x.cmp(y),
        (Some(Json::Number(x)), Some(Json::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Json::String(x)), Some(Json::String(y))) => x.as_bytes().cmp(y.as_bytes()),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// SQL `LIKE`: `%` matches any run of characters, `_` exactly one
pub fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    // Position of the last `%` seen, and the text position it resumed from
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if let Some((star, resume)) = backtrack {
            p = star + 1;
            t = resume + 1;
            backtrack = Some((star, resume + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '%')
}
