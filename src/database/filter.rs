//! Document filters.
//!
//! A [`Filter`] is a conjunction of `(dotted path, condition)` clauses. Paths
//! walk nested objects; on an array a numeric segment selects one element and
//! any other segment fans out over every element, so
//! `_admin.operations.operationState` matches against all operations.

use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Lt(Value),
    Gt(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    /// Field is absent or null
    Unset,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Condition)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: &str) -> Self {
        Self::new().eq("_id", id)
    }

    pub fn with(mut self, path: impl Into<String>, condition: Condition) -> Self {
        self.clauses.push((path.into(), condition));
        self
    }

    pub fn eq(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(path, Condition::Eq(value.into()))
    }

    pub fn ne(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(path, Condition::Ne(value.into()))
    }

    pub fn lt(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(path, Condition::Lt(value.into()))
    }

    pub fn gt(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(path, Condition::Gt(value.into()))
    }

    pub fn is_in<V: Into<Value>>(self, path: impl Into<String>, values: Vec<V>) -> Self {
        self.with(path, Condition::In(values.into_iter().map(Into::into).collect()))
    }

    pub fn not_in<V: Into<Value>>(self, path: impl Into<String>, values: Vec<V>) -> Self {
        self.with(
            path,
            Condition::NotIn(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn unset(self, path: impl Into<String>) -> Self {
        self.with(path, Condition::Unset)
    }

    /// Value of an `_id` equality clause, used by backends to narrow lookups
    pub fn id(&self) -> Option<&str> {
        self.clauses.iter().find_map(|(path, cond)| match cond {
            Condition::Eq(Value::String(id)) if path == "_id" => Some(id.as_str()),
            _ => None,
        })
    }

    /// Postgres JSON path over the scalar equality clauses, for narrowing a
    /// scan before [`Filter::matches`] runs. Lax mode fans out over arrays
    /// like [`resolve`] does, so it never rejects a matching document.
    /// Clauses with index segments or non-scalar values are left out.
    pub fn json_path(&self) -> Option<String> {
        let predicates: Vec<String> = self
            .clauses
            .iter()
            .filter_map(|(path, cond)| match cond {
                Condition::Eq(value @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) => {
                    Some(format!("@{} == {value}", json_path_accessor(path)?))
                }
                _ => None,
            })
            .collect();
        if predicates.is_empty() {
            return None;
        }
        Some(format!("$ ? ({})", predicates.join(" && ")))
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.clauses.iter().all(|(path, condition)| {
            let candidates = resolve(doc, path);
            condition_matches(condition, &candidates)
        })
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .clauses
            .iter()
            .map(|(path, cond)| match cond {
                Condition::Eq(v) => format!("{path}={v}"),
                Condition::Ne(v) => format!("{path}!={v}"),
                Condition::Lt(v) => format!("{path}<{v}"),
                Condition::Gt(v) => format!("{path}>{v}"),
                Condition::In(v) => format!("{path} in {v:?}"),
                Condition::NotIn(v) => format!("{path} not in {v:?}"),
                Condition::Unset => format!("{path} unset"),
            })
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

fn json_path_accessor(path: &str) -> Option<String> {
    let mut accessor = String::new();
    for segment in path.split('.') {
        if segment.is_empty() || segment.parse::<usize>().is_ok() {
            return None;
        }
        accessor.push('.');
        accessor.push_str(&Value::String(segment.to_string()).to_string());
    }
    Some(accessor)
}

/// All values reachable through `path`
pub fn resolve<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![doc];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            step(value, segment, &mut next);
        }
        if next.is_empty() {
            return next;
        }
        current = next;
    }
    current
}

fn step<'a>(value: &'a Value, segment: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            if let Some(v) = map.get(segment) {
                out.push(v);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = segment.parse::<usize>() {
                if let Some(v) = items.get(index) {
                    out.push(v);
                }
            } else {
                for item in items {
                    step(item, segment, out);
                }
            }
        }
        _ => {}
    }
}

fn equals(candidate: &Value, expected: &Value) -> bool {
    if candidate == expected {
        return true;
    }
    match candidate {
        Value::Array(items) => items.iter().any(|item| item == expected),
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn condition_matches(condition: &Condition, candidates: &[&Value]) -> bool {
    match condition {
        Condition::Eq(expected) => candidates.iter().any(|c| equals(c, expected)),
        Condition::Ne(expected) => !candidates.iter().any(|c| equals(c, expected)),
        Condition::Lt(bound) => candidates
            .iter()
            .any(|c| compare(c, bound) == Some(Ordering::Less)),
        Condition::Gt(bound) => candidates
            .iter()
            .any(|c| compare(c, bound) == Some(Ordering::Greater)),
        Condition::In(options) => candidates
            .iter()
            .any(|c| options.iter().any(|o| equals(c, o))),
        Condition::NotIn(options) => !candidates
            .iter()
            .any(|c| options.iter().any(|o| equals(c, o))),
        Condition::Unset => candidates.iter().all(|c| c.is_null()),
    }
}
