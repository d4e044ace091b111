use super::Field;
use crate::value::{leading_float, Value};

/// Numeric value of a loosely formatted number; `,` is accepted as the
/// decimal separator.
pub(super) fn parse_number(text: &str) -> f64 {
    leading_float(&text.replace(',', "."))
}

/// Integer part of a loosely formatted number. Plain digit runs stay exact
/// over the whole `i64` range; anything else goes through [`parse_number`].
pub(crate) fn parse_integer(text: &str) -> i64 {
    let float = parse_number(text).trunc();
    let text = text.trim_start();
    let sign = usize::from(text.starts_with(['+', '-']));
    let digits = text[sign..].bytes().take_while(u8::is_ascii_digit).count();
    match text[..sign + digits].parse::<i64>() {
        Ok(exact) if exact as f64 == float => exact,
        _ => float as i64,
    }
}

impl Field {
    pub(super) fn convert_numeric(&self, value: &Value) -> Value {
        let Some(mut n) = float_of(value) else {
            return Value::Null;
        };
        if let Some(min) = self.config.min_value {
            n = n.max(min);
        }
        if let Some(max) = self.config.max_value {
            n = n.min(max);
        }
        if self.has_text_rules() {
            n = parse_number(&self.apply_text_rules(&Value::Float(n).as_text()));
        }
        Value::Float(n)
    }

    pub(super) fn convert_integer(&self, value: &Value) -> Value {
        let Some(mut n) = integer_of(value) else {
            return Value::Null;
        };
        if let Some(min) = self.config.min_value {
            if (n as f64) < min {
                n = min.trunc() as i64;
            }
        }
        if let Some(max) = self.config.max_value {
            if (n as f64) > max {
                n = max.trunc() as i64;
            }
        }
        if self.has_text_rules() {
            n = parse_integer(&self.apply_text_rules(&n.to_string()));
        }
        Value::Int(n)
    }

    pub(super) fn coerce_numeric(&self, value: &Value) -> Value {
        float_of(value).map_or(Value::Null, Value::Float)
    }

    pub(super) fn coerce_integer(&self, value: &Value) -> Value {
        integer_of(value).map_or(Value::Null, Value::Int)
    }

    pub(super) fn unconvert_numeric(&self, value: &Value) -> Value {
        self.coerce_numeric(value)
    }

    pub(super) fn unconvert_integer(&self, value: &Value) -> Value {
        self.coerce_integer(value)
    }
}

fn float_of(value: &Value) -> Option<f64> {
    match value {
        Value::Null => None,
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        other => Some(parse_number(&other.as_text())),
    }
}

fn integer_of(value: &Value) -> Option<i64> {
    match value {
        Value::Null => None,
        Value::Int(i) => Some(*i),
        Value::Float(f) => Some(f.trunc() as i64),
        Value::Bool(b) => Some(i64::from(*b)),
        other => Some(parse_integer(&other.as_text())),
    }
}

#[cfg(test)]
mod tests {
    use super::super::*;
    use serde_json::json;

    fn field(cfg: serde_json::Value) -> Field {
        Field::new(serde_json::from_value(cfg).unwrap()).unwrap()
    }

    #[test]
    fn test_numeric_parsing() {
        let f = field(json!({"name": "a", "type": "numeric"}));
        assert_eq!(f.convert(&Value::from("12,5")).unwrap(), Value::Float(12.5));
        assert_eq!(f.convert(&Value::from("3.2kg")).unwrap(), Value::Float(3.2));
        assert_eq!(f.convert(&Value::from("abc")).unwrap(), Value::Float(0.0));
        assert_eq!(f.convert(&Value::Int(4)).unwrap(), Value::Float(4.0));
        assert_eq!(f.convert(&Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_numeric_clamps() {
        let f = field(json!({"name": "a", "type": "decimal", "minValue": 1, "maxValue": 10}));
        assert_eq!(f.convert(&Value::from("-4")).unwrap(), Value::Float(1.0));
        assert_eq!(f.convert(&Value::from("40")).unwrap(), Value::Float(10.0));
        assert_eq!(f.convert(&Value::from("5.5")).unwrap(), Value::Float(5.5));
    }

    #[test]
    fn test_integer_truncates() {
        let f = field(json!({"name": "a", "type": "integer"}));
        assert_eq!(f.convert(&Value::from("7,9")).unwrap(), Value::Int(7));
        assert_eq!(f.convert(&Value::Float(-2.7)).unwrap(), Value::Int(-2));
        assert_eq!(f.convert(&Value::from("x")).unwrap(), Value::Int(0));
        assert_eq!(f.unconvert(&Value::from("12")), Value::Int(12));
    }

    #[test]
    fn test_integer_keeps_full_i64_precision() {
        let f = field(json!({"name": "a", "type": "integer"}));
        let big = 9_007_199_254_740_993_i64;
        assert_eq!(f.convert(&Value::Int(big)).unwrap(), Value::Int(big));
        assert_eq!(f.convert(&Value::from("9007199254740993")).unwrap(), Value::Int(big));
        assert_eq!(f.unconvert(&Value::Int(big)), Value::Int(big));
        assert_eq!(f.convert(&Value::Int(i64::MIN)).unwrap(), Value::Int(i64::MIN));
        assert_eq!(f.convert(&Value::from("1e3")).unwrap(), Value::Int(1000));
    }

    #[test]
    fn test_integer_clamps_without_float_round_trip() {
        let f = field(json!({"name": "a", "type": "integer", "minValue": 0, "maxValue": 100}));
        assert_eq!(f.convert(&Value::Int(-5)).unwrap(), Value::Int(0));
        assert_eq!(f.convert(&Value::Int(250)).unwrap(), Value::Int(100));
        assert_eq!(f.convert(&Value::Int(42)).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_coerce_skips_store_rules() {
        let f = field(json!({"name": "a", "type": "integer", "length": 2, "minValue": 0}));
        assert_eq!(f.coerce(&Value::from("1234")).unwrap(), Value::Int(1234));
        assert_eq!(f.coerce(&Value::Int(-1)).unwrap(), Value::Int(-1));
        let f = field(json!({"name": "a", "type": "numeric", "maxValue": 10}));
        assert_eq!(f.coerce(&Value::from("12,5")).unwrap(), Value::Float(12.5));
    }

    #[test]
    fn test_length_applies_to_digits() {
        let f = field(json!({"name": "a", "type": "integer", "length": 2}));
        assert_eq!(f.convert(&Value::from("1234")).unwrap(), Value::Int(12));
    }
}
