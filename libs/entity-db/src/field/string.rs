use super::Field;
use crate::value::Value;

impl Field {
    pub(super) fn convert_string(&self, value: &Value) -> Value {
        if value.is_null() {
            return Value::Null;
        }
        let cfg = &self.config;
        let mut s = self.apply_text_rules(&value.as_text());

        if cfg.l_trim {
            s = s.trim_start().to_string();
        }
        if cfg.r_trim {
            s = s.trim_end().to_string();
        }
        if cfg.lower_case {
            s = s.to_lowercase();
        }
        if cfg.capital_case {
            s = upper_first(&s);
        }
        if cfg.upper_case {
            s = s.to_uppercase();
        }
        if !s.is_empty() {
            if let Some(prefix) = cfg.prefix.as_deref().filter(|p| !s.starts_with(*p)) {
                s = format!("{prefix}{s}");
            }
            if let Some(suffix) = cfg.suffix.as_deref().filter(|p| !s.ends_with(*p)) {
                s.push_str(suffix);
            }
        }
        Value::String(s)
    }

    pub(super) fn unconvert_string(&self, value: &Value) -> Value {
        let Value::String(s) = value else {
            return value.clone();
        };
        let mut s = s.as_str();
        if let Some(prefix) = self.config.prefix.as_deref() {
            s = s.strip_prefix(prefix).unwrap_or(s);
        }
        if let Some(suffix) = self.config.suffix.as_deref() {
            s = s.strip_suffix(suffix).unwrap_or(s);
        }
        Value::from(s)
    }
}

fn upper_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
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
    fn test_trims_and_cases() {
        let f = field(json!({"name": "a"}));
        assert_eq!(f.convert(&Value::from("  x  ")).unwrap(), Value::from("  x"));

        let f = field(json!({"name": "a", "lTrim": true, "capitalCase": true}));
        assert_eq!(f.convert(&Value::from("  élan ")).unwrap(), Value::from("Élan"));

        let f = field(json!({"name": "a", "lowerCase": true}));
        assert_eq!(f.convert(&Value::from("ABC")).unwrap(), Value::from("abc"));

        let f = field(json!({"name": "a", "upperCase": true}));
        assert_eq!(f.convert(&Value::from("abc")).unwrap(), Value::from("ABC"));
    }

    #[test]
    fn test_numbers_and_null() {
        let f = field(json!({"name": "a"}));
        assert_eq!(f.convert(&Value::Int(12)).unwrap(), Value::from("12"));
        assert_eq!(f.convert(&Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_prefix_and_suffix() {
        let f = field(json!({"name": "a", "prefix": "IT-", "suffix": "/X"}));
        assert_eq!(f.convert(&Value::from("42")).unwrap(), Value::from("IT-42/X"));
        assert_eq!(f.convert(&Value::from("IT-42/X")).unwrap(), Value::from("IT-42/X"));
        assert_eq!(f.convert(&Value::from("")).unwrap(), Value::from(""));
        assert_eq!(f.unconvert(&Value::from("IT-42/X")), Value::from("42"));
        assert_eq!(f.unconvert(&Value::from("42")), Value::from("42"));
    }

    #[test]
    fn test_reg_exp_then_length_before_trim() {
        let f = field(json!({"name": "a", "regExp": "/[a-z ]/", "length": 4}));
        assert_eq!(f.convert(&Value::from("ab1 c2d")).unwrap(), Value::from("ab c"));
    }
}
