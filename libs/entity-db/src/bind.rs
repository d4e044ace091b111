//! Typing of bind values and decoding of result columns per field type.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use filter_core::Operator;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sea_orm::QueryResult;
use serde_json::Value as JsonValue;

use crate::error::EntityResult;
use crate::field::{parse_integer, Field, FieldKind, FieldType};
use crate::value::{json_to_sea, leading_float, Value};

/// Bind value of a stored field value, typed after the field.
pub fn to_sea(field_type: FieldType, value: &Value) -> sea_orm::Value {
    use sea_orm::Value as S;
    match (field_type.kind(), value) {
        (FieldKind::String, Value::Null) => S::String(None),
        (FieldKind::String, v) => S::String(Some(Box::new(v.as_text()))),

        (FieldKind::Integer, Value::Null) => S::BigInt(None),
        (FieldKind::Integer, Value::Int(i)) => S::BigInt(Some(*i)),
        (FieldKind::Integer, v) => S::BigInt(Some(parse_integer(&v.as_text()))),

        (FieldKind::Numeric, Value::Null) if field_type == FieldType::Decimal => S::Decimal(None),
        (FieldKind::Numeric, Value::Null) => S::Double(None),
        (FieldKind::Numeric, v) => {
            let f = match v {
                Value::Float(f) => *f,
                Value::Int(i) => *i as f64,
                other => leading_float(&other.as_text()),
            };
            match Decimal::from_f64(f).filter(|_| field_type == FieldType::Decimal) {
                Some(d) => S::Decimal(Some(Box::new(d))),
                None => S::Double(Some(f)),
            }
        }

        (FieldKind::Bool, Value::Null) => S::Bool(None),
        (FieldKind::Bool, v) => S::Bool(Some(crate::value::truthy(v))),

        (FieldKind::Date, Value::Date(d)) => S::ChronoDate(Some(Box::new(*d))),
        (FieldKind::Date, Value::DateTime(dt)) => S::ChronoDateTime(Some(Box::new(*dt))),
        (FieldKind::Date, Value::Time(t)) => S::ChronoTime(Some(Box::new(*t))),
        (FieldKind::Date, Value::Null) => match field_type {
            FieldType::DateTime => S::ChronoDateTime(None),
            FieldType::Time => S::ChronoTime(None),
            _ => S::ChronoDate(None),
        },
        (FieldKind::Date, v) => S::String(Some(Box::new(v.as_text()))),
    }
}

/// Bind value of a filter operand. Operands of declared non string fields
/// are parsed into the field's type, without the rules applied on store;
/// LIKE patterns stay text.
pub fn filter_operand(field: Option<&Field>, op: Operator, operand: &JsonValue) -> EntityResult<sea_orm::Value> {
    if op.is_like() {
        let text = match operand {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Ok(sea_orm::Value::String(Some(Box::new(text))));
    }
    let Some(field) = field else {
        return Ok(json_to_sea(operand));
    };
    let value = Value::from(operand);
    if field.kind() == FieldKind::String {
        return Ok(to_sea(field.field_type(), &value));
    }
    let typed = field.coerce(&value)?;
    Ok(to_sea(field.field_type(), &typed))
}

/// Read one column as the field's type. `None` when the column is missing
/// or cannot be decoded.
pub fn decode_column(row: &QueryResult, column: &str, field: Option<&Field>) -> Option<Value> {
    let field_type = field.map(Field::field_type);
    let decoded = match field_type.map(FieldType::kind) {
        Some(FieldKind::Integer) => get::<i64>(row, column)
            .map(|v| v.map(Value::Int))
            .or_else(|| get::<i32>(row, column).map(|v| v.map(Value::from)))
            .or_else(|| get::<f64>(row, column).map(|v| v.map(|f| Value::Int(f as i64))))
            .or_else(|| get::<bool>(row, column).map(|v| v.map(|b| Value::Int(i64::from(b)))))
            .or_else(|| get::<String>(row, column).map(|v| v.map(Value::from))),
        Some(FieldKind::Numeric) => get::<f64>(row, column)
            .map(|v| v.map(Value::Float))
            .or_else(|| {
                get::<Decimal>(row, column).map(|v| v.and_then(|d| d.to_f64()).map(Value::Float))
            })
            .or_else(|| get::<i64>(row, column).map(|v| v.map(|i| Value::Float(i as f64))))
            .or_else(|| get::<String>(row, column).map(|v| v.map(Value::from))),
        Some(FieldKind::Bool) => get::<bool>(row, column)
            .map(|v| v.map(Value::Bool))
            .or_else(|| get::<i64>(row, column).map(|v| v.map(|i| Value::Bool(i != 0))))
            .or_else(|| get::<String>(row, column).map(|v| v.map(Value::from))),
        Some(FieldKind::Date) => {
            let typed = match field_type {
                Some(FieldType::DateTime) => {
                    get::<NaiveDateTime>(row, column).map(|v| v.map(Value::DateTime))
                }
                Some(FieldType::Time) => get::<NaiveTime>(row, column).map(|v| v.map(Value::Time)),
                _ => get::<NaiveDate>(row, column).map(|v| v.map(Value::Date)),
            };
            typed.or_else(|| get::<String>(row, column).map(|v| v.map(Value::from)))
        }
        Some(FieldKind::String) | None => get::<String>(row, column)
            .map(|v| v.map(Value::from))
            .or_else(|| get::<i64>(row, column).map(|v| v.map(Value::Int)))
            .or_else(|| get::<f64>(row, column).map(|v| v.map(Value::Float)))
            .or_else(|| get::<bool>(row, column).map(|v| v.map(Value::Bool)))
            .or_else(|| {
                get::<Decimal>(row, column).map(|v| v.and_then(|d| d.to_f64()).map(Value::Float))
            })
            .or_else(|| get::<NaiveDateTime>(row, column).map(|v| v.map(Value::DateTime)))
            .or_else(|| get::<NaiveDate>(row, column).map(|v| v.map(Value::Date))),
    };
    decoded.map(Option::unwrap_or_default)
}

fn get<T: sea_orm::TryGetable>(row: &QueryResult, column: &str) -> Option<Option<T>> {
    row.try_get::<Option<T>>("", column).ok()
}
