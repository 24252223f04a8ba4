use serde::de::DeserializeOwned;
use serde_json::Value;

/// A PATCH field: absent, explicitly `null`, or a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NullableValue<T> {
    Omitted,
    Null,
    Value(T),
}

impl<T> NullableValue<T> {
    /// `None` when omitted, `Some(None)` when cleared.
    pub fn into_patch(self) -> Option<Option<T>> {
        match self {
            NullableValue::Omitted => None,
            NullableValue::Null => Some(None),
            NullableValue::Value(value) => Some(Some(value)),
        }
    }

    /// For fields that cannot be cleared.
    pub fn into_required(self, field: &str) -> Result<Option<T>, String> {
        match self {
            NullableValue::Omitted => Ok(None),
            NullableValue::Null => Err(format!("{field} cannot be null")),
            NullableValue::Value(value) => Ok(Some(value)),
        }
    }
}

pub fn classify_nullable<T: DeserializeOwned>(
    optional_value: Option<&Value>,
) -> Result<NullableValue<T>, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(other) => serde_json::from_value(other.clone())
            .map(NullableValue::Value)
            .map_err(|err| format!("invalid value {other}: {err}")),
    }
}

/// Looks up `field` in a JSON object body and classifies it.
pub fn patch_field<T: DeserializeOwned>(
    body: &Value,
    field: &str,
) -> Result<NullableValue<T>, String> {
    classify_nullable(body.get(field)).map_err(|err| format!("{field}: {err}"))
}
