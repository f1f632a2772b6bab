//! Small value helpers shared by user diffs.

use serde_json::Value;

use crate::innerlude::Props;

/// Shallow-merge `patch` onto `base`, key by key. Later keys win.
pub fn merge(mut base: Props, patch: Props) -> Props {
    for (key, value) in patch {
        base.insert(key, value);
    }
    base
}

/// Equality comparators for prop values.
pub mod same {
    use super::*;

    /// Shallow equality: objects and arrays compare one level deep, scalars
    /// compare by value.
    pub fn shallow(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y)
            }
            _ => a == b,
        }
    }

    /// A comparator for fixed-size tuples encoded as arrays: both sides must
    /// be arrays of length exactly `n`, with equal elements.
    pub fn tuple(n: usize) -> impl Fn(&Value, &Value) -> bool {
        move |a, b| match (a, b) {
            (Value::Array(a), Value::Array(b)) => {
                a.len() == n && b.len() == n && a.iter().zip(b).all(|(x, y)| x == y)
            }
            _ => false,
        }
    }
}
