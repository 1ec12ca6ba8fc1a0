use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Class name the store uses for user records.
pub const USER_CLASS: &str = "_User";

/// Generic runtime value stored in an object field.
///
/// Covers every JSON-compatible type plus the typed values the store
/// wraps in `__type` envelopes on the wire (dates, bytes, geo points and
/// nested objects). Conversion to and from the wire shape lives in
/// [`crate::codec`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// JSON null.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON integer (signed 64-bit).
    Int(i64),
    /// JSON floating-point (64-bit IEEE 754).
    Float(f64),
    /// JSON string (UTF-8).
    String(String),
    /// Point in time, wire form `{"__type":"Date","iso":...}`.
    Date(DateTime<Utc>),
    /// Binary data, wire form `{"__type":"Bytes","base64":...}`.
    Bytes(Vec<u8>),
    /// Geographic coordinate, wire form `{"__type":"GeoPoint",...}`.
    GeoPoint(GeoPoint),
    /// Another store object, written either embedded or as a pointer.
    Object(Box<Object>),
    /// JSON array (ordered sequence of values).
    Array(Vec<Value>),
    /// JSON object. Uses `BTreeMap` for deterministic serialization order.
    Map(BTreeMap<String, Value>),
}

impl Value {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view that also accepts integers.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(d),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Looks up `key` when this value is a map.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Date(v)
    }
}

impl From<GeoPoint> for Value {
    fn from(v: GeoPoint) -> Self {
        Self::GeoPoint(v)
    }
}

impl From<Object> for Value {
    fn from(v: Object) -> Self {
        Self::Object(Box::new(v))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Self::Map(v)
    }
}

/// Structural conversion: no `__type` envelope is interpreted.
///
/// Use [`crate::codec::decode_value`] when the JSON came from the store
/// and typed envelopes must be recognised.
impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

/// Latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// A generic store-backed record.
///
/// `id` is empty until the store assigns one on creation. Timestamps are
/// `None` when the store has not reported them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Object {
    /// Store-assigned identifier (`objectId`).
    pub id: String,
    /// Class (collection) the object belongs to.
    pub class_name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Non-reserved fields in key order.
    pub fields: BTreeMap<String, Value>,
}

impl Object {
    /// Creates an empty, not-yet-persisted object of the given class.
    #[must_use]
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            ..Self::default()
        }
    }

    /// Creates an object that only references a stored record.
    #[must_use]
    pub fn pointer(class_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            class_name: class_name.into(),
            ..Self::default()
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// A `_User` object together with the session token the store issued.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct User {
    pub object: Object,
    /// Empty when the user was loaded without a session.
    pub session_token: String,
}

impl User {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.object.id
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.object.get("username").and_then(Value::as_str)
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.object.get("email").and_then(Value::as_str)
    }

    #[must_use]
    pub fn mobile_phone_number(&self) -> Option<&str> {
        self.object.get("mobilePhoneNumber").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_conversion_keeps_type_envelopes_as_maps() {
        let json = serde_json::json!({"__type": "Date", "iso": "2020-01-01T00:00:00.000Z"});
        let value = Value::from(json);
        assert_eq!(value.get("__type").and_then(Value::as_str), Some("Date"));
    }

    #[test]
    fn structural_conversion_prefers_integers() {
        assert_eq!(Value::from(serde_json::json!(3)), Value::Int(3));
        assert_eq!(Value::from(serde_json::json!(3.5)), Value::Float(3.5));
    }

    #[test]
    fn object_builder_sets_fields_in_key_order() {
        let obj = Object::new("Todo").with("title", "x").with("done", false);
        let keys: Vec<_> = obj.fields.keys().cloned().collect();
        assert_eq!(keys, vec!["done", "title"]);
        assert!(obj.id.is_empty());
    }

    #[test]
    fn user_accessors_read_object_fields() {
        let user = User {
            object: Object::pointer(USER_CLASS, "u1")
                .with("username", "alice")
                .with("email", "a@example.com"),
            session_token: "tok".to_string(),
        };
        assert_eq!(user.id(), "u1");
        assert_eq!(user.username(), Some("alice"));
        assert_eq!(user.email(), Some("a@example.com"));
        assert_eq!(user.mobile_phone_number(), None);
    }
}
