//! Object codec: typed values <-> the store's JSON wire shape.
//!
//! The store wraps non-JSON types in `{"__type": ...}` envelopes. Objects
//! nested inside a payload are written in one of two conventions:
//!
//! - **internal** (trusted calls such as RPC results): the full object is
//!   embedded as `{"__type":"Object","className":...,<fields>}`;
//! - **external**: only a `{"__type":"Pointer","className","objectId"}`
//!   reference is written.
//!
//! Top-level records carry reserved metadata (`objectId`, `sessionToken`,
//! `createdAt`, `updatedAt`) which [`extract_metadata`] splits off from the
//! regular fields.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map};

use crate::error::CodecError;
use crate::types::{GeoPoint, Object, User, Value, USER_CLASS};

const TYPE_KEY: &str = "__type";
const CLASS_NAME_KEY: &str = "className";
const OBJECT_ID_KEY: &str = "objectId";
const SESSION_TOKEN_KEY: &str = "sessionToken";
const CREATED_AT_KEY: &str = "createdAt";
const UPDATED_AT_KEY: &str = "updatedAt";

/// Keys never copied into [`Metadata::fields`].
const RESERVED_KEYS: [&str; 6] = [
    TYPE_KEY,
    CLASS_NAME_KEY,
    OBJECT_ID_KEY,
    SESSION_TOKEN_KEY,
    CREATED_AT_KEY,
    UPDATED_AT_KEY,
];

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

/// Formats a timestamp the way the store expects: UTC, millisecond precision.
#[must_use]
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an RFC 3339 timestamp into UTC.
///
/// # Errors
///
/// Returns the underlying parse error when `s` is not RFC 3339.
pub fn parse_date(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc))
}

/// The store's date envelope: `{"__type":"Date","iso":"..."}`.
#[must_use]
pub fn encode_date(date: &DateTime<Utc>) -> serde_json::Value {
    json!({ TYPE_KEY: "Date", "iso": format_date(date) })
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encodes a single value into its wire form.
#[must_use]
pub fn encode_value(value: &Value, internal: bool) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => json!(i),
        Value::Float(f) => float_to_json(*f),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Date(d) => encode_date(d),
        Value::Bytes(bytes) => json!({ TYPE_KEY: "Bytes", "base64": STANDARD.encode(bytes) }),
        Value::GeoPoint(point) => json!({
            TYPE_KEY: "GeoPoint",
            "latitude": point.latitude,
            "longitude": point.longitude,
        }),
        Value::Object(object) => {
            if internal {
                serde_json::Value::Object(encode_object(object, true))
            } else {
                encode_pointer(object)
            }
        }
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| encode_value(v, internal)).collect())
        }
        Value::Map(map) => serde_json::Value::Object(encode_fields(map, internal)),
    }
}

/// Encodes a field map. Used for create/update payloads and hook patches.
#[must_use]
pub fn encode_fields(fields: &BTreeMap<String, Value>, internal: bool) -> Map<String, serde_json::Value> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), encode_value(v, internal)))
        .collect()
}

/// Encodes an object as an embedded `__type: Object` document.
#[must_use]
pub fn encode_object(object: &Object, internal: bool) -> Map<String, serde_json::Value> {
    let mut map = Map::new();
    map.insert(TYPE_KEY.to_string(), json!("Object"));
    map.insert(CLASS_NAME_KEY.to_string(), json!(object.class_name));
    if !object.id.is_empty() {
        map.insert(OBJECT_ID_KEY.to_string(), json!(object.id));
    }
    if let Some(created_at) = &object.created_at {
        map.insert(CREATED_AT_KEY.to_string(), json!(format_date(created_at)));
    }
    if let Some(updated_at) = &object.updated_at {
        map.insert(UPDATED_AT_KEY.to_string(), json!(format_date(updated_at)));
    }
    map.extend(encode_fields(&object.fields, internal));
    map
}

/// Encodes a reference to a stored object.
#[must_use]
pub fn encode_pointer(object: &Object) -> serde_json::Value {
    json!({
        TYPE_KEY: "Pointer",
        CLASS_NAME_KEY: object.class_name,
        OBJECT_ID_KEY: object.id,
    })
}

fn float_to_json(f: f64) -> serde_json::Value {
    serde_json::Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

/// Plain JSON rendering with no `__type` envelopes.
///
/// Direct (non-RPC) cloud function results are written this way: dates
/// become ISO strings, bytes become base64 strings and objects flatten into
/// their fields plus `objectId`/`createdAt`/`updatedAt`.
#[must_use]
pub fn to_plain_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Date(d) => json!(format_date(d)),
        Value::Bytes(bytes) => json!(STANDARD.encode(bytes)),
        Value::GeoPoint(point) => json!({
            "latitude": point.latitude,
            "longitude": point.longitude,
        }),
        Value::Object(object) => {
            let mut map = Map::new();
            if !object.id.is_empty() {
                map.insert(OBJECT_ID_KEY.to_string(), json!(object.id));
            }
            if let Some(created_at) = &object.created_at {
                map.insert(CREATED_AT_KEY.to_string(), json!(format_date(created_at)));
            }
            if let Some(updated_at) = &object.updated_at {
                map.insert(UPDATED_AT_KEY.to_string(), json!(format_date(updated_at)));
            }
            for (k, v) in &object.fields {
                map.insert(k.clone(), to_plain_json(v));
            }
            serde_json::Value::Object(map)
        }
        Value::Array(items) => serde_json::Value::Array(items.iter().map(to_plain_json).collect()),
        Value::Map(map) => serde_json::Value::Object(
            map.iter().map(|(k, v)| (k.clone(), to_plain_json(v))).collect(),
        ),
        other => encode_value(other, false),
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Reserved metadata split off a store record, plus the remaining fields.
///
/// Unset reserved fields resolve to their zero value (`""` / `None`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub id: String,
    pub session_token: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub fields: BTreeMap<String, Value>,
}

/// Splits a store record into reserved metadata and decoded fields.
///
/// # Errors
///
/// Returns [`CodecError::NotAnObject`] if `json` is not a JSON object,
/// [`CodecError::InvalidField`] naming the reserved field whose shape is
/// wrong, or [`CodecError::Field`] when a regular field fails to decode.
pub fn extract_metadata(json: &serde_json::Value) -> Result<Metadata, CodecError> {
    let map = json.as_object().ok_or(CodecError::NotAnObject {
        found: json_type_name(json),
    })?;

    let mut metadata = Metadata {
        id: optional_string(map, OBJECT_ID_KEY)?,
        session_token: optional_string(map, SESSION_TOKEN_KEY)?,
        created_at: optional_date(map, CREATED_AT_KEY)?,
        updated_at: optional_date(map, UPDATED_AT_KEY)?,
        fields: BTreeMap::new(),
    };

    for (key, value) in map {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        let decoded = decode_value(value).map_err(|source| CodecError::Field {
            field: key.clone(),
            source: Box::new(source),
        })?;
        metadata.fields.insert(key.clone(), decoded);
    }

    Ok(metadata)
}

/// Decodes a store record into an [`Object`].
///
/// `className` in the record wins over `class_name`.
///
/// # Errors
///
/// See [`extract_metadata`].
pub fn decode_object(json: &serde_json::Value, class_name: &str) -> Result<Object, CodecError> {
    let metadata = extract_metadata(json)?;
    let class_name = json
        .get(CLASS_NAME_KEY)
        .and_then(serde_json::Value::as_str)
        .unwrap_or(class_name);
    Ok(Object {
        id: metadata.id,
        class_name: class_name.to_string(),
        created_at: metadata.created_at,
        updated_at: metadata.updated_at,
        fields: metadata.fields,
    })
}

/// Decodes a `_User` record, keeping its session token.
///
/// # Errors
///
/// See [`extract_metadata`].
pub fn decode_user(json: &serde_json::Value) -> Result<User, CodecError> {
    let metadata = extract_metadata(json)?;
    Ok(User {
        object: Object {
            id: metadata.id,
            class_name: USER_CLASS.to_string(),
            created_at: metadata.created_at,
            updated_at: metadata.updated_at,
            fields: metadata.fields,
        },
        session_token: metadata.session_token,
    })
}

/// Decodes a wire value, interpreting `__type` envelopes.
///
/// Unknown envelope types are kept as plain maps.
///
/// # Errors
///
/// Returns [`CodecError::InvalidEnvelope`] for a recognised envelope with a
/// missing or malformed member.
pub fn decode_value(json: &serde_json::Value) -> Result<Value, CodecError> {
    match json {
        serde_json::Value::Array(items) => {
            let decoded = items.iter().map(decode_value).collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(decoded))
        }
        serde_json::Value::Object(map) => {
            match map.get(TYPE_KEY).and_then(serde_json::Value::as_str) {
                Some("Date") => decode_date_envelope(map),
                Some("Bytes") => decode_bytes_envelope(map),
                Some("GeoPoint") => decode_geo_envelope(map),
                Some("Pointer") => {
                    let class_name = envelope_str(map, CLASS_NAME_KEY, "Pointer")?;
                    let id = envelope_str(map, OBJECT_ID_KEY, "Pointer")?;
                    Ok(Value::Object(Box::new(Object::pointer(class_name, id))))
                }
                Some("Object") => {
                    let class_name = envelope_str(map, CLASS_NAME_KEY, "Object")?;
                    Ok(Value::Object(Box::new(decode_object(json, class_name)?)))
                }
                _ => {
                    let mut decoded = BTreeMap::new();
                    for (key, value) in map {
                        decoded.insert(key.clone(), decode_value(value)?);
                    }
                    Ok(Value::Map(decoded))
                }
            }
        }
        scalar => Ok(Value::from(scalar.clone())),
    }
}

fn decode_date_envelope(map: &Map<String, serde_json::Value>) -> Result<Value, CodecError> {
    let iso = envelope_str(map, "iso", "Date")?;
    parse_date(iso)
        .map(Value::Date)
        .map_err(|e| CodecError::InvalidEnvelope {
            kind: "Date",
            reason: e.to_string(),
        })
}

fn decode_bytes_envelope(map: &Map<String, serde_json::Value>) -> Result<Value, CodecError> {
    let encoded = envelope_str(map, "base64", "Bytes")?;
    STANDARD
        .decode(encoded)
        .map(Value::Bytes)
        .map_err(|e| CodecError::InvalidEnvelope {
            kind: "Bytes",
            reason: e.to_string(),
        })
}

fn decode_geo_envelope(map: &Map<String, serde_json::Value>) -> Result<Value, CodecError> {
    let coordinate = |key: &str| {
        map.get(key)
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| CodecError::InvalidEnvelope {
                kind: "GeoPoint",
                reason: format!("missing numeric {key}"),
            })
    };
    Ok(Value::GeoPoint(GeoPoint {
        latitude: coordinate("latitude")?,
        longitude: coordinate("longitude")?,
    }))
}

fn envelope_str<'a>(
    map: &'a Map<String, serde_json::Value>,
    key: &str,
    kind: &'static str,
) -> Result<&'a str, CodecError> {
    map.get(key)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CodecError::InvalidEnvelope {
            kind,
            reason: format!("missing string {key}"),
        })
}

fn optional_string(map: &Map<String, serde_json::Value>, key: &str) -> Result<String, CodecError> {
    match map.get(key) {
        None | Some(serde_json::Value::Null) => Ok(String::new()),
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(CodecError::InvalidField {
            field: key.to_string(),
        }),
    }
}

fn optional_date(
    map: &Map<String, serde_json::Value>,
    key: &str,
) -> Result<Option<DateTime<Utc>>, CodecError> {
    let raw = optional_string(map, key)?;
    if raw.is_empty() {
        return Ok(None);
    }
    parse_date(&raw).map(Some).map_err(|_| CodecError::InvalidField {
        field: key.to_string(),
    })
}

pub(crate) fn json_type_name(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
