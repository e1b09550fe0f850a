//! Conversions between `serde_json::Value` and Yrs values.
//!
//! The replicated document stores opaque payload leaves as `yrs::Any`; the
//! plain snapshot model lives in `serde_json`. These adapters are the only
//! place the two meet.

use serde_json::Value;
use yrs::types::ToJson;
use yrs::{Any, GetString, ReadTxn};

/// Convert a `serde_json::Value` to `yrs::Any`.
pub fn json_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Any::BigInt(i)
            } else if let Some(f) = n.as_f64() {
                Any::Number(f)
            } else {
                Any::Null
            }
        }
        Value::String(s) => Any::String(s.clone().into()),
        Value::Array(arr) => {
            let items: Vec<Any> = arr.iter().map(json_to_any).collect();
            Any::Array(items.into())
        }
        Value::Object(obj) => {
            let mut map = std::collections::HashMap::new();
            for (k, v) in obj {
                map.insert(k.clone(), json_to_any(v));
            }
            Any::Map(map.into())
        }
    }
}

/// Convert a `yrs::Any` to `serde_json::Value`.
pub fn any_to_json(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(n) => serde_json::json!(n),
        Any::BigInt(i) => serde_json::json!(i),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(b) => {
            use base64::{engine::general_purpose::STANDARD, Engine};
            Value::String(STANDARD.encode(b))
        }
        Any::Array(arr) => Value::Array(arr.iter().map(any_to_json).collect()),
        Any::Map(map) => {
            let obj: serde_json::Map<String, Value> =
                map.iter().map(|(k, v)| (k.clone(), any_to_json(v))).collect();
            Value::Object(obj)
        }
    }
}

/// Deep-convert any replicated value (map, array, or plain) to JSON.
pub fn yrs_value_to_json<T: ReadTxn>(txn: &T, value: yrs::Value) -> Value {
    match value {
        yrs::Value::Any(any) => any_to_json(&any),
        yrs::Value::YMap(map) => any_to_json(&map.to_json(txn)),
        yrs::Value::YArray(array) => any_to_json(&array.to_json(txn)),
        yrs::Value::YText(text) => Value::String(text.get_string(txn)),
        _ => Value::Null,
    }
}
