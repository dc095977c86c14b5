//! Raw handler results.
//!
//! A handler may hand back many shapes: a finished [`Response`], bytes, text,
//! a JSON-like mapping, a status code, a `(code, message)` pair, or an entity.
//! [`Reply`] is the closed set of those shapes. The normalization stage maps
//! each one to exactly one [`ResponseVariant`](crate::ResponseVariant).

use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Error;
use crate::response::Response;

/// What a handler returned, before normalization.
#[derive(Debug)]
pub enum Reply {
    /// A response the handler built itself. Forwarded unchanged.
    Stream(Response),
    Bytes(Bytes),
    Text(String),
    Map(Map<String, Value>),
    Int(i64),
    /// A two-element sequence, typically `(code, message)`.
    Pair(Value, Value),
    /// Anything else; rendered as plain text.
    Value(Value),
}

impl Reply {
    /// Serializes an entity to its field mapping.
    ///
    /// Objects become [`Reply::Map`]; other JSON shapes follow the same rules
    /// as `From<Value>`.
    pub fn object<T: Serialize + ?Sized>(entity: &T) -> Result<Self, Error> {
        Ok(Self::from(serde_json::to_value(entity)?))
    }

    /// Template reply: `{"__template__": name, ..context}`.
    pub fn template(name: &str, mut context: Map<String, Value>) -> Self {
        context.insert(crate::middleware::TEMPLATE_KEY.to_owned(), Value::from(name));
        Self::Map(context)
    }

    /// `redirect:<location>` text reply.
    pub fn redirect(location: &str) -> Self {
        Self::Text(format!("{}{location}", crate::middleware::REDIRECT_PREFIX))
    }
}

impl From<Response> for Reply {
    fn from(r: Response) -> Self { Self::Stream(r) }
}

impl From<Bytes> for Reply {
    fn from(b: Bytes) -> Self { Self::Bytes(b) }
}

impl From<Vec<u8>> for Reply {
    fn from(b: Vec<u8>) -> Self { Self::Bytes(Bytes::from(b)) }
}

impl From<&str> for Reply {
    fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for Reply {
    fn from(s: String) -> Self { Self::Text(s) }
}

impl From<u16> for Reply {
    fn from(code: u16) -> Self { Self::Int(i64::from(code)) }
}

impl From<i64> for Reply {
    fn from(n: i64) -> Self { Self::Int(n) }
}

impl From<StatusCode> for Reply {
    fn from(code: StatusCode) -> Self { Self::Int(i64::from(code.as_u16())) }
}

impl<S: Into<String>> From<(u16, S)> for Reply {
    fn from((code, message): (u16, S)) -> Self {
        Self::Pair(Value::from(code), Value::String(message.into()))
    }
}

impl From<Map<String, Value>> for Reply {
    fn from(m: Map<String, Value>) -> Self { Self::Map(m) }
}

impl From<Value> for Reply {
    fn from(v: Value) -> Self {
        match v {
            Value::String(s) => Self::Text(s),
            Value::Object(m) => Self::Map(m),
            Value::Number(n) if n.is_i64() => Self::Int(n.as_i64().unwrap_or_default()),
            Value::Array(mut items) if items.len() == 2 => {
                let second = items.pop().unwrap_or(Value::Null);
                let first = items.pop().unwrap_or(Value::Null);
                Self::Pair(first, second)
            }
            other => Self::Value(other),
        }
    }
}

/// Text form of a JSON value: strings verbatim, everything else as JSON.
pub(crate) fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
