//! Positional-or-named parameter extraction. Each handler builds one
//! [`ParamReader`] over its `&Params` and pulls fields by name; if the
//! caller used positional params, fields are consumed in the order
//! requested instead.

use serde_json::{Map, Value};

use crate::error::DaemonError;
use crate::protocol::Params;

pub struct ParamReader<'a> {
    params: &'a Params,
    next_position: usize,
}

impl<'a> ParamReader<'a> {
    pub fn new(params: &'a Params) -> Self {
        ParamReader {
            params,
            next_position: 0,
        }
    }

    fn next_value(&mut self, name: &str) -> Option<&'a Value> {
        match self.params {
            Params::ByName(map) => map.get(name),
            Params::ByPosition(items) => {
                let v = items.get(self.next_position);
                self.next_position += 1;
                v
            }
            Params::None => None,
        }
    }

    fn missing(name: &str) -> DaemonError {
        DaemonError::InvalidParams(format!("missing required parameter \"{name}\""))
    }

    fn type_mismatch(name: &str, expected: &str) -> DaemonError {
        DaemonError::InvalidParams(format!("parameter \"{name}\" must be a {expected}"))
    }

    pub fn required_str(&mut self, name: &str) -> Result<String, DaemonError> {
        match self.next_value(name) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Value::String(_)) => Err(Self::type_mismatch(name, "non-empty string")),
            Some(_) => Err(Self::type_mismatch(name, "string")),
            None => Err(Self::missing(name)),
        }
    }

    pub fn optional_str(&mut self, name: &str) -> Result<Option<String>, DaemonError> {
        match self.next_value(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(Self::type_mismatch(name, "string")),
        }
    }

    pub fn required_i32(&mut self, name: &str) -> Result<i32, DaemonError> {
        match self.next_value(name) {
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(|| Self::type_mismatch(name, "32-bit integer")),
            Some(_) => Err(Self::type_mismatch(name, "32-bit integer")),
            None => Err(Self::missing(name)),
        }
    }

    pub fn required_u32(&mut self, name: &str) -> Result<u32, DaemonError> {
        match self.next_value(name) {
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| Self::type_mismatch(name, "unsigned 32-bit integer")),
            Some(_) => Err(Self::type_mismatch(name, "unsigned 32-bit integer")),
            None => Err(Self::missing(name)),
        }
    }

    pub fn optional_u32(&mut self, name: &str) -> Result<Option<u32>, DaemonError> {
        match self.next_value(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(Some)
                .ok_or_else(|| Self::type_mismatch(name, "unsigned 32-bit integer")),
            Some(_) => Err(Self::type_mismatch(name, "unsigned 32-bit integer")),
        }
    }

    pub fn required_u8(&mut self, name: &str) -> Result<u8, DaemonError> {
        match self.next_value(name) {
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|v| u8::try_from(v).ok())
                .ok_or_else(|| Self::type_mismatch(name, "integer in 0..=255")),
            Some(_) => Err(Self::type_mismatch(name, "integer in 0..=255")),
            None => Err(Self::missing(name)),
        }
    }

    pub fn optional_u8(&mut self, name: &str) -> Result<Option<u8>, DaemonError> {
        match self.next_value(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|v| u8::try_from(v).ok())
                .map(Some)
                .ok_or_else(|| Self::type_mismatch(name, "integer in 0..=255")),
            Some(_) => Err(Self::type_mismatch(name, "integer in 0..=255")),
        }
    }

    pub fn optional_bool(&mut self, name: &str) -> Result<Option<bool>, DaemonError> {
        match self.next_value(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(Self::type_mismatch(name, "boolean")),
        }
    }

    pub fn optional_object(&mut self, name: &str) -> Result<Option<Map<String, Value>>, DaemonError> {
        match self.next_value(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map.clone())),
            Some(_) => Err(Self::type_mismatch(name, "object")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_named_params_by_key() {
        let mut map = Map::new();
        map.insert("name".to_string(), json!("scene1"));
        let params = Params::ByName(map);
        let mut r = ParamReader::new(&params);
        assert_eq!(r.required_str("name").unwrap(), "scene1");
    }

    #[test]
    fn reads_positional_params_in_request_order() {
        let params = Params::ByPosition(vec![json!("a"), json!(7)]);
        let mut r = ParamReader::new(&params);
        assert_eq!(r.required_str("first").unwrap(), "a");
        assert_eq!(r.required_i32("second").unwrap(), 7);
    }

    #[test]
    fn missing_required_field_is_invalid_params() {
        let params = Params::None;
        let mut r = ParamReader::new(&params);
        let err = r.required_str("name").unwrap_err();
        assert!(matches!(err, DaemonError::InvalidParams(_)));
    }

    #[test]
    fn wrong_type_is_invalid_params() {
        let mut map = Map::new();
        map.insert("x".to_string(), json!("not a number"));
        let params = Params::ByName(map);
        let mut r = ParamReader::new(&params);
        let err = r.required_i32("x").unwrap_err();
        assert!(matches!(err, DaemonError::InvalidParams(_)));
    }

    #[test]
    fn optional_field_absent_is_none() {
        let params = Params::None;
        let mut r = ParamReader::new(&params);
        assert_eq!(r.optional_str("nickname").unwrap(), None);
    }
}
