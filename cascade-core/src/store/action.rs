//! Actions
//!
//! An action is a plain tagged record: a `type` plus any number of other
//! fields. Only `type` is reserved. Actions arriving as untyped JSON are
//! validated when they are converted, so a value that is not an object, or an
//! object with a missing or `null` `type`, never reaches a reducer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// Action types reserved by the store itself.
pub struct ActionType;

impl ActionType {
    /// Dispatched once when a store is created.
    pub const INIT: &'static str = "@@redux/INIT";

    /// Dispatched after the reducer has been replaced.
    pub const REPLACE: &'static str = "@@redux/REPLACE";
}

/// A plain tagged record describing an intended state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct Action {
    #[serde(rename = "type")]
    kind: Value,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Action {
    /// Create an action with a string `type` and no other fields.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: Value::String(kind.into()),
            fields: Map::new(),
        }
    }

    /// Add a field. A field named `type` is ignored; use [`Action::new`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "type" {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// The action's `type` value.
    pub fn kind(&self) -> &Value {
        &self.kind
    }

    /// The `type` as a string, if it is one.
    pub fn name(&self) -> Option<&str> {
        self.kind.as_str()
    }

    /// Whether `type` is the given string.
    pub fn is(&self, kind: &str) -> bool {
        self.kind.as_str() == Some(kind)
    }

    /// Look up a non-`type` field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl TryFrom<Value> for Action {
    type Error = StoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(mut fields) = value else {
            return Err(StoreError::InvalidAction(
                "actions must be plain objects; use custom middleware for other values".into(),
            ));
        };

        match fields.remove("type") {
            None | Some(Value::Null) => Err(StoreError::InvalidAction(
                "actions may not have an undefined \"type\" property".into(),
            )),
            Some(kind) => Ok(Self { kind, fields }),
        }
    }
}

impl From<Action> for Value {
    fn from(action: Action) -> Self {
        let mut fields = action.fields;
        fields.insert("type".into(), action.kind);
        Value::Object(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_with_type_converts() {
        let action = Action::try_from(json!({ "type": "ADD", "amount": 3 })).unwrap();
        assert!(action.is("ADD"));
        assert_eq!(action.get("amount"), Some(&json!(3)));
        assert!(action.get("type").is_none());
    }

    #[test]
    fn non_string_types_are_allowed() {
        let action = Action::try_from(json!({ "type": 7 })).unwrap();
        assert_eq!(action.kind(), &json!(7));
        assert!(!action.is("7"));
    }

    #[test]
    fn missing_or_null_type_is_rejected() {
        for value in [json!({}), json!({ "type": null }), json!({ "kind": "ADD" })] {
            assert!(matches!(
                Action::try_from(value),
                Err(StoreError::InvalidAction(_))
            ));
        }
    }

    #[test]
    fn non_objects_are_rejected() {
        for value in [json!(null), json!("ADD"), json!([{ "type": "ADD" }]), json!(1)] {
            assert!(matches!(
                Action::try_from(value),
                Err(StoreError::InvalidAction(_))
            ));
        }
    }

    #[test]
    fn serde_round_trip_keeps_type_field() {
        let action = Action::new("SET").with("value", "x").with("type", "ignored");
        let encoded = serde_json::to_value(&action).unwrap();
        assert_eq!(encoded, json!({ "type": "SET", "value": "x" }));

        let decoded: Action = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, action);
        assert!(serde_json::from_value::<Action>(json!({ "value": 1 })).is_err());
    }
}
