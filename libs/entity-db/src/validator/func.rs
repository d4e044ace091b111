use async_trait::async_trait;

use super::{ValidationError, Validator};
use crate::entity::Entity;
use crate::error::EntityResult;

/// Adapts a closure into a [`Validator`].
pub struct FnValidator<F> {
    check: F,
    fields: Vec<String>,
}

impl<F> FnValidator<F>
where
    F: Fn(&Entity, Option<&str>) -> Vec<ValidationError> + Send + Sync,
{
    pub fn new(check: F) -> Self {
        Self {
            check,
            fields: Vec::new(),
        }
    }

    /// Fields whose single field validation should also run this check.
    pub fn on_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl<F> Validator for FnValidator<F>
where
    F: Fn(&Entity, Option<&str>) -> Vec<ValidationError> + Send + Sync,
{
    async fn validate(
        &self,
        entity: &Entity,
        field: Option<&str>,
    ) -> EntityResult<Vec<ValidationError>> {
        Ok((self.check)(entity, field))
    }

    fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }
}
