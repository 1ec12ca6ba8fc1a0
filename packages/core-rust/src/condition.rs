//! Condition encoder: a typed comparison plus a value -> wire query operator.

use serde_json::json;

use crate::codec::{encode_date, encode_value};
use crate::types::Value;

/// Comparison operators understood by the store's `where` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Implicit equality; the value is written bare.
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    /// Field value is one of the given values.
    In,
    /// Field value is none of the given values.
    NotIn,
    /// Array field contains all of the given values.
    All,
    Regex,
}

impl Operator {
    /// Wire name of the operator, `None` for implicit equality.
    #[must_use]
    pub fn as_wire(self) -> Option<&'static str> {
        match self {
            Self::Equal => None,
            Self::NotEqual => Some("$ne"),
            Self::LessThan => Some("$lt"),
            Self::LessThanOrEqual => Some("$lte"),
            Self::GreaterThan => Some("$gt"),
            Self::GreaterThanOrEqual => Some("$gte"),
            Self::In => Some("$in"),
            Self::NotIn => Some("$nin"),
            Self::All => Some("$all"),
            Self::Regex => Some("$regex"),
        }
    }
}

/// Encodes one constraint for the `where` map.
///
/// Dates are normalized to the store's date envelope. Every other value is
/// written in its plain wire form, including shapes the store may not accept
/// for the operator (a map inside `$gt`, say); rejecting those is left to
/// the store. `options` is only read for [`Operator::Regex`].
#[must_use]
pub fn encode_condition(operator: Operator, value: &Value, options: &str) -> serde_json::Value {
    match operator {
        Operator::Regex => json!({
            "$regex": encode_value(value, false),
            "$options": options,
        }),
        Operator::Equal => normalize(value),
        op => {
            let mut wrapped = serde_json::Map::new();
            // as_wire is Some for every operator except Equal.
            if let Some(name) = op.as_wire() {
                wrapped.insert(name.to_string(), normalize(value));
            }
            serde_json::Value::Object(wrapped)
        }
    }
}

fn normalize(value: &Value) -> serde_json::Value {
    match value {
        Value::Date(d) => encode_date(d),
        other => encode_value(other, false),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn comparison_operators_wrap_value() {
        let cases = [
            (Operator::NotEqual, "$ne"),
            (Operator::LessThan, "$lt"),
            (Operator::LessThanOrEqual, "$lte"),
            (Operator::GreaterThan, "$gt"),
            (Operator::GreaterThanOrEqual, "$gte"),
            (Operator::In, "$in"),
            (Operator::NotIn, "$nin"),
            (Operator::All, "$all"),
        ];
        for (op, name) in cases {
            let encoded = encode_condition(op, &Value::Int(5), "");
            assert_eq!(encoded, json!({ name: 5 }), "operator {name}");
        }
    }

    #[test]
    fn dates_are_normalized_inside_operators() {
        let when = Utc.timestamp_millis_opt(1_577_836_800_000).unwrap();
        let encoded = encode_condition(Operator::GreaterThan, &Value::Date(when), "");
        assert_eq!(
            encoded,
            json!({"$gt": {"__type": "Date", "iso": "2020-01-01T00:00:00.000Z"}})
        );
    }

    #[test]
    fn equality_normalizes_dates_and_passes_other_values() {
        let when = Utc.timestamp_millis_opt(0).unwrap();
        assert_eq!(
            encode_condition(Operator::Equal, &Value::Date(when), ""),
            json!({"__type": "Date", "iso": "1970-01-01T00:00:00.000Z"})
        );
        assert_eq!(
            encode_condition(Operator::Equal, &Value::from("done"), ""),
            json!("done")
        );
    }

    #[test]
    fn regex_always_carries_options() {
        assert_eq!(
            encode_condition(Operator::Regex, &Value::from("^ab"), ""),
            json!({"$regex": "^ab", "$options": ""})
        );
        assert_eq!(
            encode_condition(Operator::Regex, &Value::from("ab"), "i"),
            json!({"$regex": "ab", "$options": "i"})
        );
    }

    #[test]
    fn unsupported_shapes_pass_through() {
        let nested = Value::from(serde_json::json!({"a": 1}));
        assert_eq!(
            encode_condition(Operator::LessThan, &nested, ""),
            json!({"$lt": {"a": 1}})
        );
    }
}
