use async_trait::async_trait;

use super::{ValidationError, Validator};
use crate::entity::Entity;
use crate::error::EntityResult;
use crate::value::Value;

const DEFAULT_MESSAGE: &str = "%s is mandatory";

/// Fails when the field has no value. Empty strings fail, whitespace does not.
#[derive(Clone, Debug)]
pub struct FieldNotBlankValidator {
    field: String,
    message: String,
}

impl FieldNotBlankValidator {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: DEFAULT_MESSAGE.to_string(),
        }
    }

    /// `%s` in `message` is replaced by the field label.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

#[async_trait]
impl Validator for FieldNotBlankValidator {
    async fn validate(
        &self,
        entity: &Entity,
        _field: Option<&str>,
    ) -> EntityResult<Vec<ValidationError>> {
        let has_value = match entity.get(&self.field) {
            Value::String(s) => !s.is_empty(),
            other => !other.is_blank(),
        };
        if has_value {
            return Ok(Vec::new());
        }
        let label = entity
            .field(&self.field)
            .map(|f| f.label().to_string())
            .unwrap_or_else(|| self.field.clone());
        Ok(vec![ValidationError::for_field(
            self.field.clone(),
            self.message.replace("%s", &label),
        )])
    }

    fn has_field(&self, field: &str) -> bool {
        self.field == field
    }
}
