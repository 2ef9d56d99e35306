//! Type-directed conversion between stored records and JSON mappings.
//!
//! Serialization rules per semantic type:
//!
//! | type | form |
//! |------|------|
//! | integer, real, string, boolean | identity |
//! | decimal | JSON number (held as a double, so precision beyond ~15 digits is lost) |
//! | date, time, datetime | ISO-8601 text |
//! | duration | total seconds as a number, microsecond precision |
//! | bytes | standard padded base64 |
//! | array of T | JSON array of serialized T |
//! | opaque | the JSON tree as stored |
//!
//! Deserialization is the inverse and is lenient about numbers and booleans sent as text,
//! which is what path segments and query strings carry.

use crate::config::{ColumnSpec, Property, SemanticType};
use crate::error::CoercionError;
use crate::value::{Record, Value, DATETIME_FORMAT, DATE_FORMAT, TIME_FORMAT};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde_json::{Map, Number, Value as JsonValue};

/// Serializer/deserializer pair. Override `serialize` or `deserialize` to change how one
/// type (or one column) is rendered; the record-level methods are built on them.
pub trait Coercer: Send + Sync {
    fn serialize(&self, name: &str, kind: &SemanticType, value: &Value) -> Result<JsonValue, CoercionError> {
        serialize_value(name, kind, value)
    }

    fn deserialize(&self, name: &str, kind: &SemanticType, raw: &JsonValue) -> Result<Value, CoercionError> {
        deserialize_value(name, kind, raw)
    }

    /// Columns then properties. Relationships are added by the endpoint, which owns the
    /// session needed to load them.
    fn serialize_record(
        &self,
        record: &Record,
        columns: &[&ColumnSpec],
        properties: &[Property],
    ) -> Result<Map<String, JsonValue>, CoercionError> {
        let mut out = Map::new();
        for col in columns {
            let v = record.value(&col.name);
            out.insert(col.name.clone(), self.serialize(&col.name, &col.kind, &v)?);
        }
        for prop in properties {
            let v = (prop.compute)(record);
            let json = match &prop.formatter {
                Some(fmt) => fmt(&v),
                None => self.serialize(&prop.name, &prop.kind, &v)?,
            };
            out.insert(prop.name.clone(), json);
        }
        Ok(out)
    }

    /// Deserializes the payload keys that name one of `columns`; other keys are ignored.
    fn deserialize_fields(
        &self,
        payload: &Map<String, JsonValue>,
        columns: &[&ColumnSpec],
    ) -> Result<Vec<(String, Value)>, CoercionError> {
        let mut fields = Vec::new();
        for col in columns {
            if let Some(raw) = payload.get(&col.name) {
                fields.push((col.name.clone(), self.deserialize(&col.name, &col.kind, raw)?));
            }
        }
        Ok(fields)
    }

    /// Assigns payload values onto an existing record. With `blank_missing`, columns the
    /// payload omits are set to null (replace semantics) instead of kept (patch semantics).
    fn merge(
        &self,
        record: &mut Record,
        payload: &Map<String, JsonValue>,
        columns: &[&ColumnSpec],
        blank_missing: bool,
    ) -> Result<(), CoercionError> {
        for (name, value) in self.deserialize_fields(payload, columns)? {
            record.set(name, value);
        }
        if blank_missing {
            for col in columns {
                if !payload.contains_key(&col.name) {
                    record.set(col.name.clone(), Value::Null);
                }
            }
        }
        Ok(())
    }

    /// New record holding only what the payload provides; the store fills defaults.
    fn create(&self, payload: &Map<String, JsonValue>, columns: &[&ColumnSpec]) -> Result<Record, CoercionError> {
        Ok(self.deserialize_fields(payload, columns)?.into_iter().collect())
    }
}

/// Coercer with the stock rule table.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCoercer;

impl Coercer for DefaultCoercer {}

fn number(name: &str, n: f64) -> Result<JsonValue, CoercionError> {
    Number::from_f64(n)
        .map(JsonValue::Number)
        .ok_or_else(|| CoercionError::new(name, format!("{} is not a finite number", n)))
}

pub fn duration_seconds(d: &TimeDelta) -> f64 {
    match d.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => d.num_milliseconds() as f64 / 1_000.0,
    }
}

pub fn seconds_to_duration(name: &str, secs: f64) -> Result<TimeDelta, CoercionError> {
    if !secs.is_finite() || secs.abs() > (i64::MAX / 1_000_000) as f64 {
        return Err(CoercionError::new(name, format!("duration out of range: {}", secs)));
    }
    Ok(TimeDelta::microseconds((secs * 1_000_000.0).round() as i64))
}

fn mismatch(name: &str, kind: &SemanticType, value: &Value) -> CoercionError {
    CoercionError::new(name, format!("stored value {:?} is not of type {}", value, kind))
}

pub fn serialize_value(name: &str, kind: &SemanticType, value: &Value) -> Result<JsonValue, CoercionError> {
    Ok(match (kind, value) {
        (_, Value::Null) => JsonValue::Null,
        (SemanticType::Integer, Value::Integer(n)) => JsonValue::Number((*n).into()),
        (SemanticType::Boolean, Value::Boolean(b)) => JsonValue::Bool(*b),
        (SemanticType::Real | SemanticType::Decimal, Value::Real(n) | Value::Decimal(n)) => number(name, *n)?,
        (SemanticType::Real | SemanticType::Decimal, Value::Integer(n)) => number(name, *n as f64)?,
        (SemanticType::String, Value::String(s)) => JsonValue::String(s.clone()),
        (SemanticType::Bytes, Value::Bytes(b)) => JsonValue::String(STANDARD.encode(b)),
        (SemanticType::Date, Value::Date(d)) => JsonValue::String(d.format(DATE_FORMAT).to_string()),
        (SemanticType::Time, Value::Time(t)) => JsonValue::String(t.format(TIME_FORMAT).to_string()),
        (SemanticType::DateTime, Value::DateTime(dt)) => JsonValue::String(dt.format(DATETIME_FORMAT).to_string()),
        (SemanticType::Duration, Value::Duration(d)) => number(name, duration_seconds(d))?,
        (SemanticType::Array(inner), Value::Array(items)) => JsonValue::Array(
            items
                .iter()
                .map(|v| serialize_value(name, inner, v))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        (SemanticType::Opaque, Value::Opaque(j)) => j.clone(),
        (SemanticType::Opaque, other) => untyped_json(name, other)?,
        (kind, other) => return Err(mismatch(name, kind, other)),
    })
}

/// Renders a value by its own variant, for opaque columns holding typed values.
fn untyped_json(name: &str, value: &Value) -> Result<JsonValue, CoercionError> {
    let kind = match value {
        Value::Null => return Ok(JsonValue::Null),
        Value::Integer(_) => SemanticType::Integer,
        Value::Boolean(_) => SemanticType::Boolean,
        Value::Real(_) => SemanticType::Real,
        Value::Decimal(_) => SemanticType::Decimal,
        Value::String(_) => SemanticType::String,
        Value::Bytes(_) => SemanticType::Bytes,
        Value::Date(_) => SemanticType::Date,
        Value::Time(_) => SemanticType::Time,
        Value::DateTime(_) => SemanticType::DateTime,
        Value::Duration(_) => SemanticType::Duration,
        Value::Array(items) => {
            return Ok(JsonValue::Array(
                items.iter().map(|v| untyped_json(name, v)).collect::<Result<Vec<_>, _>>()?,
            ))
        }
        Value::Opaque(j) => return Ok(j.clone()),
    };
    serialize_value(name, &kind, value)
}

fn expected(name: &str, what: &str, raw: &JsonValue) -> CoercionError {
    CoercionError::new(name, format!("expected {}, got {}", what, raw))
}

fn as_f64(name: &str, what: &str, raw: &JsonValue) -> Result<f64, CoercionError> {
    match raw {
        JsonValue::Number(n) => n.as_f64().ok_or_else(|| expected(name, what, raw)),
        JsonValue::String(s) => s.trim().parse::<f64>().map_err(|_| expected(name, what, raw)),
        _ => Err(expected(name, what, raw)),
    }
}

fn as_str<'a>(name: &str, what: &str, raw: &'a JsonValue) -> Result<&'a str, CoercionError> {
    raw.as_str().ok_or_else(|| expected(name, what, raw))
}

pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

pub fn deserialize_value(name: &str, kind: &SemanticType, raw: &JsonValue) -> Result<Value, CoercionError> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    Ok(match kind {
        SemanticType::Integer => match raw {
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => {
                    let f = n.as_f64().unwrap_or(f64::NAN);
                    // i64::MAX as f64 rounds up to 2^63, which is already out of range.
                    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
                        Value::Integer(f as i64)
                    } else {
                        return Err(expected(name, "an integer", raw));
                    }
                }
            },
            JsonValue::String(s) => Value::Integer(s.trim().parse().map_err(|_| expected(name, "an integer", raw))?),
            _ => return Err(expected(name, "an integer", raw)),
        },
        SemanticType::Boolean => match raw {
            JsonValue::Bool(b) => Value::Boolean(*b),
            JsonValue::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" => Value::Boolean(true),
                "false" | "0" => Value::Boolean(false),
                _ => return Err(expected(name, "a boolean", raw)),
            },
            JsonValue::Number(n) if n.as_i64() == Some(0) || n.as_i64() == Some(1) => {
                Value::Boolean(n.as_i64() == Some(1))
            }
            _ => return Err(expected(name, "a boolean", raw)),
        },
        SemanticType::Real => Value::Real(as_f64(name, "a number", raw)?),
        SemanticType::Decimal => Value::Decimal(as_f64(name, "a decimal", raw)?),
        SemanticType::String => match raw {
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Number(n) => Value::String(n.to_string()),
            JsonValue::Bool(b) => Value::String(b.to_string()),
            _ => return Err(expected(name, "a string", raw)),
        },
        SemanticType::Bytes => {
            let s = as_str(name, "base64 text", raw)?;
            Value::Bytes(STANDARD.decode(s).map_err(|e| CoercionError::new(name, format!("invalid base64: {}", e)))?)
        }
        SemanticType::Date => {
            let s = as_str(name, "an ISO date", raw)?;
            Value::Date(NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|_| expected(name, "an ISO date", raw))?)
        }
        SemanticType::Time => {
            let s = as_str(name, "an ISO time", raw)?;
            Value::Time(parse_time(s).ok_or_else(|| expected(name, "an ISO time", raw))?)
        }
        SemanticType::DateTime => {
            let s = as_str(name, "an ISO datetime", raw)?;
            Value::DateTime(parse_datetime(s).ok_or_else(|| expected(name, "an ISO datetime", raw))?)
        }
        SemanticType::Duration => Value::Duration(seconds_to_duration(name, as_f64(name, "seconds", raw)?)?),
        SemanticType::Array(inner) => match raw {
            JsonValue::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| deserialize_value(name, inner, v))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            _ => return Err(expected(name, "an array", raw)),
        },
        SemanticType::Opaque => Value::Opaque(raw.clone()),
    })
}

/// Parses a path segment or query-string value for a column of type `kind`.
/// Arrays accept JSON text or a comma-separated list.
pub fn parse_text(name: &str, kind: &SemanticType, text: &str) -> Result<Value, CoercionError> {
    match kind {
        SemanticType::Array(inner) => {
            if let Ok(json @ JsonValue::Array(_)) = serde_json::from_str::<JsonValue>(text) {
                return deserialize_value(name, kind, &json);
            }
            text.split(',')
                .map(|part| parse_text(name, inner, part))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        SemanticType::Opaque => Ok(Value::Opaque(
            serde_json::from_str(text).unwrap_or_else(|_| JsonValue::String(text.to_string())),
        )),
        _ => deserialize_value(name, kind, &JsonValue::String(text.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(kind: SemanticType, value: Value) {
        let json = serialize_value("c", &kind, &value).unwrap();
        let back = deserialize_value("c", &kind, &json).unwrap();
        assert_eq!(back, value, "round trip through {}", json);
    }

    #[test]
    fn every_semantic_type_round_trips() {
        round_trip(SemanticType::Integer, Value::Integer(-42));
        round_trip(SemanticType::Boolean, Value::Boolean(true));
        round_trip(SemanticType::Real, Value::Real(12.5));
        round_trip(SemanticType::Decimal, Value::Decimal(7200.000012));
        round_trip(SemanticType::String, Value::String("maple".into()));
        round_trip(SemanticType::Bytes, Value::Bytes(vec![0, 159, 146, 150]));
        round_trip(SemanticType::Date, Value::Date(NaiveDate::from_ymd_opt(2016, 2, 29).unwrap()));
        round_trip(SemanticType::Time, Value::Time(NaiveTime::from_hms_micro_opt(13, 5, 9, 250).unwrap()));
        round_trip(
            SemanticType::DateTime,
            Value::DateTime(NaiveDate::from_ymd_opt(1999, 12, 31).unwrap().and_hms_opt(23, 59, 58).unwrap()),
        );
        round_trip(SemanticType::Duration, Value::Duration(TimeDelta::microseconds(7_200_000_012)));
        round_trip(
            SemanticType::array_of(SemanticType::Integer),
            Value::Array(vec![Value::Integer(1), Value::Null, Value::Integer(3)]),
        );
        round_trip(SemanticType::Opaque, Value::Opaque(json!({"nested": [1, "two"]})));
        round_trip(SemanticType::Date, Value::Null);
    }

    #[test]
    fn duration_serializes_to_total_seconds() {
        let d = Value::Duration(TimeDelta::seconds(1_041_300));
        assert_eq!(serialize_value("age", &SemanticType::Duration, &d).unwrap(), json!(1041300.0));
    }

    #[test]
    fn integers_out_of_range_are_rejected() {
        let kind = SemanticType::Integer;
        assert_eq!(deserialize_value("size", &kind, &json!(12.0)).unwrap(), Value::Integer(12));
        let err = deserialize_value("size", &kind, &json!(1e20)).unwrap_err();
        assert_eq!(err.column, "size");
        assert!(deserialize_value("size", &kind, &json!(-1e19)).is_err());
        assert!(deserialize_value("size", &kind, &json!(9.5)).is_err());
    }

    #[test]
    fn bytes_use_base64() {
        let v = serialize_value("blob", &SemanticType::Bytes, &Value::Bytes(b"hi".to_vec())).unwrap();
        assert_eq!(v, json!("aGk="));
    }

    #[test]
    fn type_mismatch_reports_column() {
        let err = deserialize_value("size", &SemanticType::Integer, &json!("big")).unwrap_err();
        assert_eq!(err.column, "size");
        let err = serialize_value("size", &SemanticType::Integer, &Value::String("x".into())).unwrap_err();
        assert_eq!(err.column, "size");
    }

    #[test]
    fn text_parsing_for_paths_and_queries() {
        assert_eq!(parse_text("id", &SemanticType::Integer, "6").unwrap(), Value::Integer(6));
        assert_eq!(parse_text("ok", &SemanticType::Boolean, "false").unwrap(), Value::Boolean(false));
        assert_eq!(
            parse_text("tags", &SemanticType::array_of(SemanticType::String), "a,b").unwrap(),
            Value::Array(vec!["a".into(), "b".into()])
        );
        assert!(parse_text("id", &SemanticType::Integer, "six").is_err());
    }

    #[test]
    fn rfc3339_datetimes_are_accepted() {
        let v = deserialize_value("at", &SemanticType::DateTime, &json!("2020-01-02T03:04:05+01:00")).unwrap();
        assert_eq!(v, Value::DateTime(NaiveDate::from_ymd_opt(2020, 1, 2).unwrap().and_hms_opt(2, 4, 5).unwrap()));
    }

    #[test]
    fn merge_blanks_or_keeps_missing_columns() {
        let name = ColumnSpec::new("name", SemanticType::String);
        let color = ColumnSpec::new("color", SemanticType::String);
        let cols = vec![&name, &color];
        let payload = json!({"name": "oak"});
        let payload = payload.as_object().unwrap();

        let mut kept = Record::new().with("name", "pine").with("color", "green");
        DefaultCoercer.merge(&mut kept, payload, &cols, false).unwrap();
        assert_eq!(kept.value("color"), Value::from("green"));

        let mut blanked = Record::new().with("name", "pine").with("color", "green");
        DefaultCoercer.merge(&mut blanked, payload, &cols, true).unwrap();
        assert_eq!(blanked.value("name"), Value::from("oak"));
        assert_eq!(blanked.value("color"), Value::Null);
    }

    #[test]
    fn properties_use_formatter_when_present() {
        let id = ColumnSpec::new("id", SemanticType::Integer);
        let props = vec![
            Property::new("double", SemanticType::Integer, |r: &Record| match r.value("id") {
                Value::Integer(n) => Value::Integer(n * 2),
                _ => Value::Null,
            }),
            Property::new("label", SemanticType::String, |_r: &Record| Value::Null)
                .formatted(|_v: &Value| json!("fixed")),
        ];
        let out = DefaultCoercer
            .serialize_record(&Record::new().with("id", 4), &[&id], &props)
            .unwrap();
        assert_eq!(JsonValue::Object(out), json!({"id": 4, "double": 8, "label": "fixed"}));
    }
}
