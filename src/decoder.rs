use crate::error::DecodeError;
use crate::record::Record;
use serde_json::{Map, Value};

/// Turns one raw input line into a `Record`
pub trait LineDecoder: Send {
    fn decode(&self, line: &str) -> Result<Record, DecodeError>;
}

/// Decoder for one JSON object per line
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDecoder;

impl JsonDecoder {
    pub fn new() -> Self {
        Self
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn string_field(map: &mut Map<String, Value>, field: &'static str) -> Result<String, DecodeError> {
    match map.remove(field) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(DecodeError::WrongType {
            field,
            expected: "a string",
        }),
        None => Err(DecodeError::MissingField(field)),
    }
}

fn integer_field(map: &Map<String, Value>, field: &'static str) -> Result<i64, DecodeError> {
    match map.get(field) {
        Some(Value::Number(n)) => n.as_i64().ok_or(DecodeError::WrongType {
            field,
            expected: "an integer",
        }),
        Some(_) => Err(DecodeError::WrongType {
            field,
            expected: "an integer",
        }),
        None => Err(DecodeError::MissingField(field)),
    }
}

impl LineDecoder for JsonDecoder {
    fn decode(&self, line: &str) -> Result<Record, DecodeError> {
        let value: Value = serde_json::from_str(line.trim())?;

        let mut map = match value {
            Value::Object(map) => map,
            other => return Err(DecodeError::NotAnObject(value_kind(&other))),
        };

        let timestamp = integer_field(&map, "timestamp")?;
        Ok(Record {
            id: string_field(&mut map, "id")?,
            kind: string_field(&mut map, "type")?,
            host: string_field(&mut map, "host")?,
            timestamp,
        })
    }
}
