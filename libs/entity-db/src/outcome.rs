//! Result of a write operation, carried back to callers instead of an error.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::validator::ValidationErrors;

pub const SUCCESS_TITLE: &str = "Operation completed successfully";
pub const WARNING_TITLE: &str = "Operation completed with warnings";
pub const ERROR_TITLE: &str = "Operation terminated with errors!";

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Outcome {
    pub success: bool,
    pub errors: IndexMap<String, Vec<String>>,
    pub warnings: Vec<String>,
    pub data: JsonValue,
}

impl Outcome {
    pub fn ok(data: JsonValue) -> Self {
        Self {
            success: true,
            data,
            ..Default::default()
        }
    }

    pub fn failed(errors: ValidationErrors, data: JsonValue) -> Self {
        Self {
            success: false,
            errors: errors.into_map(),
            warnings: Vec::new(),
            data,
        }
    }

    /// Failure recorded under a single key such as `_insert`.
    pub fn error(key: &str, message: impl Into<String>, data: JsonValue) -> Self {
        let mut errors = IndexMap::new();
        errors.insert(key.to_string(), vec![message.into()]);
        Self {
            success: false,
            errors,
            warnings: Vec::new(),
            data,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) -> &mut Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn add_error(&mut self, key: &str, message: impl Into<String>) -> &mut Self {
        self.errors
            .entry(key.to_string())
            .or_default()
            .push(message.into());
        self.success = false;
        self
    }

    pub fn set_data(&mut self, data: JsonValue) -> &mut Self {
        self.data = data;
        self
    }

    pub fn title(&self) -> &'static str {
        if !self.success {
            ERROR_TITLE
        } else if self.has_warnings() {
            WARNING_TITLE
        } else {
            SUCCESS_TITLE
        }
    }

    /// JSON form including the title.
    pub fn to_value(&self) -> JsonValue {
        serde_json::json!({
            "success": self.success,
            "title": self.title(),
            "errors": self.errors,
            "warnings": self.warnings,
            "data": self.data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_titles() {
        let mut out = Outcome::ok(json!({"id": 1}));
        assert_eq!(out.title(), SUCCESS_TITLE);
        out.add_warning("Unique key t_uk_abc123 already exists");
        assert_eq!(out.title(), WARNING_TITLE);
        out.add_error("_insert", "boom");
        assert_eq!(out.title(), ERROR_TITLE);
        assert!(!out.is_success());
    }

    #[test]
    fn test_error_value() {
        let out = Outcome::error("_delete", "No record to delete", JsonValue::Null);
        assert_eq!(
            out.to_value(),
            json!({
                "success": false,
                "title": ERROR_TITLE,
                "errors": {"_delete": ["No record to delete"]},
                "warnings": [],
                "data": null
            })
        );
    }
}
