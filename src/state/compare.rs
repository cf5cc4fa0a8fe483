//! Deep equality and hashing over the canonical form of a state's properties.
//!
//! The canonical form is a JSON object with lowercased keys in sorted order and
//! timestamps rendered as RFC 3339 text. Two states are equal when their
//! canonical forms are equal node by node. Only the property bag takes part;
//! the state name does not.

use crate::state::property_bag::{PropertyBag, PropertyValue};
use crate::state::state::StateRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// How integers and floats compare to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NumericEquality {
    /// Integer 1 and float 1.0 are different values
    #[default]
    Strict,
    /// Integral floats compare equal to the matching integer
    Lenient,
}

fn canonical_value(value: &PropertyValue, numeric: NumericEquality) -> Value {
    match (value, numeric) {
        (PropertyValue::Float(f), NumericEquality::Lenient)
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 =>
        {
            Value::from(*f as i64)
        }
        _ => value.to_json(),
    }
}

/// Canonical JSON form of a property bag
pub fn canonical_form(properties: &PropertyBag, numeric: NumericEquality) -> Value {
    // Bag iteration is already ordered by folded key.
    let map = properties
        .iter()
        .map(|(key, value)| (key.to_lowercase(), canonical_value(value, numeric)))
        .collect::<Map<String, Value>>();
    Value::Object(map)
}

pub fn deep_equals<A: StateRecord + ?Sized, B: StateRecord + ?Sized>(left: &A, right: &B) -> bool {
    deep_equals_with(left, right, NumericEquality::Strict)
}

pub fn deep_equals_with<A: StateRecord + ?Sized, B: StateRecord + ?Sized>(
    left: &A,
    right: &B,
    numeric: NumericEquality,
) -> bool {
    let left = left.properties();
    let right = right.properties();
    if left.len() != right.len() {
        return false;
    }
    canonical_form(left, numeric) == canonical_form(right, numeric)
}

pub fn hash_of<S: StateRecord + ?Sized>(state: &S) -> u64 {
    hash_of_with(state, NumericEquality::Strict)
}

/// Hash of the canonical serialized form. Deep-equal states hash equal under
/// the same numeric policy.
pub fn hash_of_with<S: StateRecord + ?Sized>(state: &S, numeric: NumericEquality) -> u64 {
    let canonical = canonical_form(state.properties(), numeric).to_string();
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    hasher.finish()
}
