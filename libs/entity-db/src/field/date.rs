use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use super::{Field, FieldType};
use crate::error::FieldError;
use crate::value::{Value, DATETIME_FORMAT, DATE_FORMAT, TIME_FORMAT};

// Accepted after the configured format fails, so database text and ISO
// input still parse.
const DATETIME_FALLBACKS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
];
const TIME_FALLBACKS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

impl Field {
    /// strftime format used to parse and print values of this field.
    pub fn date_format(&self) -> &str {
        match self.config.format.as_deref() {
            Some(f) if !f.is_empty() => f,
            _ => match self.field_type {
                FieldType::DateTime => DATETIME_FORMAT,
                FieldType::Time => TIME_FORMAT,
                _ => DATE_FORMAT,
            },
        }
    }

    pub(super) fn convert_date(&self, value: &Value) -> Result<Value, FieldError> {
        let out = match (self.field_type, value) {
            (_, Value::Null) => Value::Null,
            (_, Value::String(s)) if s.trim().is_empty() => Value::Null,
            (_, Value::String(s)) => self.parse_date_text(s.trim())?,

            (FieldType::DateTime, Value::Date(d)) => Value::DateTime(d.and_time(NaiveTime::MIN)),
            (FieldType::DateTime, Value::DateTime(dt)) => Value::DateTime(*dt),
            (FieldType::Time, Value::Time(t)) => Value::Time(*t),
            (FieldType::Time, Value::DateTime(dt)) => Value::Time(dt.time()),
            (FieldType::Date, Value::Date(d)) => Value::Date(*d),
            (FieldType::Date, Value::DateTime(dt)) => Value::Date(dt.date()),
            (_, other) => return Err(self.invalid_date(&other.as_text())),
        };
        Ok(out)
    }

    fn parse_date_text(&self, s: &str) -> Result<Value, FieldError> {
        let format = self.date_format();
        let parsed = match self.field_type {
            FieldType::DateTime => parse_datetime(s, format).map(Value::DateTime),
            FieldType::Time => std::iter::once(format)
                .chain(TIME_FALLBACKS.iter().copied())
                .find_map(|f| NaiveTime::parse_from_str(s, f).ok())
                .map(Value::Time),
            _ => NaiveDate::parse_from_str(s, format)
                .ok()
                .or_else(|| parse_datetime(s, DATETIME_FORMAT).map(|dt| dt.date()))
                .map(Value::Date),
        };
        parsed.ok_or_else(|| self.invalid_date(s))
    }

    fn invalid_date(&self, value: &str) -> FieldError {
        FieldError::InvalidDate {
            field: self.name().to_string(),
            value: value.to_string(),
            format: self.date_format().to_string(),
        }
    }

    pub(super) fn unconvert_date(&self, value: &Value) -> Value {
        let format = self.date_format();
        match value {
            Value::Date(d) => Value::String(d.format(format).to_string()),
            Value::DateTime(dt) => Value::String(dt.format(format).to_string()),
            Value::Time(t) => Value::String(t.format(format).to_string()),
            other => other.clone(),
        }
    }
}

fn parse_datetime(s: &str, format: &str) -> Option<NaiveDateTime> {
    std::iter::once(format)
        .chain(DATETIME_FALLBACKS.iter().copied())
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

#[cfg(test)]
mod tests {
    use super::super::*;
    use chrono::{NaiveDate, NaiveTime};
    use serde_json::json;

    fn field(cfg: serde_json::Value) -> Field {
        Field::new(serde_json::from_value(cfg).unwrap()).unwrap()
    }

    #[test]
    fn test_date_parse_and_format() {
        let f = field(json!({"name": "born", "type": "date"}));
        let d = NaiveDate::from_ymd_opt(1990, 5, 17).unwrap();
        assert_eq!(f.convert(&Value::from("1990-05-17")).unwrap(), Value::Date(d));
        assert_eq!(f.convert(&Value::from("")).unwrap(), Value::Null);
        assert_eq!(f.unconvert(&Value::Date(d)), Value::from("1990-05-17"));
    }

    #[test]
    fn test_custom_format() {
        let f = field(json!({"name": "born", "type": "date", "format": "%d/%m/%Y"}));
        let d = NaiveDate::from_ymd_opt(1990, 5, 17).unwrap();
        assert_eq!(f.convert(&Value::from("17/05/1990")).unwrap(), Value::Date(d));
        assert_eq!(f.unconvert(&Value::Date(d)), Value::from("17/05/1990"));
    }

    #[test]
    fn test_datetime_and_time() {
        let f = field(json!({"name": "at", "type": "datetime"}));
        let v = f.convert(&Value::from("2024-01-02T03:04:05")).unwrap();
        assert_eq!(f.unconvert(&v), Value::from("2024-01-02 03:04:05"));
        let v = f.convert(&Value::from("2024-01-02")).unwrap();
        assert_eq!(f.unconvert(&v), Value::from("2024-01-02 00:00:00"));

        let t = field(json!({"name": "at", "type": "time"}));
        assert_eq!(
            t.convert(&Value::from("08:30")).unwrap(),
            Value::Time(NaiveTime::from_hms_opt(8, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_invalid_dates() {
        let f = field(json!({"name": "born", "type": "date"}));
        let err = f.convert(&Value::from("31/31/2020")).unwrap_err();
        assert_eq!(
            err,
            FieldError::InvalidDate {
                field: "born".into(),
                value: "31/31/2020".into(),
                format: "%Y-%m-%d".into()
            }
        );
        assert!(f.convert(&Value::Int(3)).is_err());
    }
}
