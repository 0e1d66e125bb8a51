//! Equality used to decide whether derived props changed.
//!
//! State is compared by snapshot identity: reducers return a new `Arc` for
//! every real transition, so pointer equality is exact and O(1).
//!
//! Props are compared shallowly, key by key, through [`PropValue`]. A value
//! held in an `Arc` compares by identity and is never walked, so a nested
//! snapshot counts as changed whenever it was reallocated. Plain data such as
//! numbers and strings compares by value. A JSON [`Value`] has no identity to
//! compare, so nested JSON compares by `==` all the way down.

use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

/// A pluggable comparator over shared snapshots.
pub type Equality<T> = Arc<dyn Fn(&Arc<T>, &Arc<T>) -> bool + Send + Sync>;

/// Key-wise equality: same key set, equal value under each key.
pub trait ShallowEq {
    fn shallow_eq(&self, other: &Self) -> bool;
}

/// Identity comparator. The default for state.
pub fn strict_equal<T>() -> Equality<T>
where
    T: Send + Sync + 'static,
{
    Arc::new(|a: &Arc<T>, b: &Arc<T>| Arc::ptr_eq(a, b))
}

/// Shallow comparator. The default for own props and state props.
pub fn shallow_equal<T>() -> Equality<T>
where
    T: ShallowEq + Send + Sync + 'static,
{
    Arc::new(|a: &Arc<T>, b: &Arc<T>| Arc::ptr_eq(a, b) || a.shallow_eq(b))
}

/// How one prop value is compared inside a shallow comparison.
pub trait PropValue {
    fn same_value(&self, other: &Self) -> bool;
}

impl<T: ?Sized> PropValue for Arc<T> {
    fn same_value(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: PropValue> PropValue for Option<T> {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same_value(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl PropValue for Value {
    fn same_value(&self, other: &Self) -> bool {
        self == other
    }
}

macro_rules! by_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl PropValue for $ty {
                fn same_value(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

by_value!(
    (), bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, String,
    &'static str,
);

fn same_entries<'a, K, V, I, F>(len: usize, other_len: usize, mut entries: I, lookup: F) -> bool
where
    K: 'a,
    V: PropValue + 'a,
    I: Iterator<Item = (&'a K, &'a V)>,
    F: Fn(&K) -> Option<&'a V>,
{
    len == other_len && entries.all(|(key, value)| lookup(key).map_or(false, |o| o.same_value(value)))
}

impl ShallowEq for () {
    fn shallow_eq(&self, _other: &Self) -> bool {
        true
    }
}

impl<T: ShallowEq> ShallowEq for Arc<T> {
    fn shallow_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other) || (**self).shallow_eq(other)
    }
}

impl ShallowEq for Map<String, Value> {
    fn shallow_eq(&self, other: &Self) -> bool {
        same_entries(self.len(), other.len(), self.iter(), |key| other.get(key))
    }
}

/// Objects compare key-wise; every other value by `==`.
impl ShallowEq for Value {
    fn shallow_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => a.shallow_eq(b),
            _ => self == other,
        }
    }
}

impl<K, V, H> ShallowEq for IndexMap<K, V, H>
where
    K: Hash + Eq,
    V: PropValue,
    H: BuildHasher,
{
    fn shallow_eq(&self, other: &Self) -> bool {
        same_entries(self.len(), other.len(), self.iter(), |key| other.get(key))
    }
}

impl<K, V, H> ShallowEq for HashMap<K, V, H>
where
    K: Hash + Eq,
    V: PropValue,
    H: BuildHasher,
{
    fn shallow_eq(&self, other: &Self) -> bool {
        same_entries(self.len(), other.len(), self.iter(), |key| other.get(key))
    }
}

impl<K: Ord, V: PropValue> ShallowEq for BTreeMap<K, V> {
    fn shallow_eq(&self, other: &Self) -> bool {
        same_entries(self.len(), other.len(), self.iter(), |key| other.get(key))
    }
}

/// Element-wise, in order.
impl<T: PropValue> ShallowEq for Vec<T> {
    fn shallow_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same_value(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn maps_compare_key_wise_regardless_of_order() {
        let a = object(json!({ "a": 1, "b": "two" }));
        let b = object(json!({ "b": "two", "a": 1 }));
        assert!(a.shallow_eq(&b));

        let c = object(json!({ "a": 1 }));
        assert!(!a.shallow_eq(&c));
        assert!(!c.shallow_eq(&a));

        let d = object(json!({ "a": 1, "c": "two" }));
        assert!(!a.shallow_eq(&d));
    }

    #[test]
    fn strict_equal_is_identity() {
        let eq = strict_equal::<i64>();
        let a = Arc::new(1);
        let b = Arc::new(1);
        assert!(eq(&a, &a.clone()));
        assert!(!eq(&a, &b));
    }

    #[test]
    fn shallow_equal_accepts_new_allocation_with_same_fields() {
        let eq = shallow_equal::<IndexMap<String, i64>>();
        let a: Arc<IndexMap<String, i64>> = Arc::new([("x".to_string(), 1)].into_iter().collect());
        let b: Arc<IndexMap<String, i64>> = Arc::new([("x".to_string(), 1)].into_iter().collect());
        let c: Arc<IndexMap<String, i64>> = Arc::new([("x".to_string(), 2)].into_iter().collect());

        assert!(eq(&a, &b));
        assert!(!eq(&a, &c));
    }

    #[test]
    fn non_object_values_fall_back_to_equality() {
        assert!(json!(3).shallow_eq(&json!(3)));
        assert!(!json!(3).shallow_eq(&json!("3")));
        assert!(!json!({ "a": 1 }).shallow_eq(&json!([1])));
    }

    #[test]
    fn shared_values_compare_by_identity_not_contents() {
        let inner = Arc::new(vec![1, 2, 3]);
        let a: HashMap<&str, Arc<Vec<i32>>> = [("items", inner.clone())].into_iter().collect();
        let b: HashMap<&str, Arc<Vec<i32>>> = [("items", inner)].into_iter().collect();
        let c: HashMap<&str, Arc<Vec<i32>>> = [("items", Arc::new(vec![1, 2, 3]))].into_iter().collect();

        assert!(a.shallow_eq(&b));
        assert!(!a.shallow_eq(&c));

        let shared = Arc::new("x".to_string());
        assert!(vec![shared.clone()].shallow_eq(&vec![shared]));
        assert!(!vec![Arc::new(1)].shallow_eq(&vec![Arc::new(1)]));
    }

    #[test]
    fn nested_json_compares_by_value() {
        let a = object(json!({ "user": { "name": "ada" } }));
        let b = object(json!({ "user": { "name": "ada" } }));
        let c = object(json!({ "user": { "name": "bob" } }));

        assert!(a.shallow_eq(&b));
        assert!(!a.shallow_eq(&c));
    }

    #[test]
    fn optional_values_match_only_when_both_present_and_equal() {
        let a: BTreeMap<u8, Option<i64>> = [(1, Some(5)), (2, None)].into_iter().collect();
        let b: BTreeMap<u8, Option<i64>> = [(1, Some(5)), (2, None)].into_iter().collect();
        let c: BTreeMap<u8, Option<i64>> = [(1, Some(5)), (2, Some(0))].into_iter().collect();

        assert!(a.shallow_eq(&b));
        assert!(!a.shallow_eq(&c));
    }

    #[test]
    fn unit_props_are_always_equal() {
        assert!(().shallow_eq(&()));
    }
}
