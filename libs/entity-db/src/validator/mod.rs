//! Field and row validators.
//!
//! Validators are registered as [`ValidatorSlot`]s, either on a field or on
//! the entity schema (row validators). A slot may name a `next` row
//! validator: when the slot reports errors the whole `next` chain is skipped
//! until row validation runs again. Whether a slot is currently running or
//! skipped is tracked per entity, so schemas stay shareable.

mod foreign_key;
mod func;
mod not_blank;
mod unique_key;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;

use crate::entity::Entity;
use crate::error::EntityResult;
use crate::value::Row;

pub use foreign_key::{ForeignKeyField, ForeignKeyValidator};
pub use func::FnValidator;
pub use not_blank::FieldNotBlankValidator;
pub use unique_key::{UniqueKeyField, UniqueKeyGroup, UniqueKeyValidator};

/// Key under which row level errors without a field are collected.
pub const ROW_ERRORS_KEY: &str = "_row";

/// One failed check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{field}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Error messages grouped by field name, row errors under [`ROW_ERRORS_KEY`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(IndexMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn push(&mut self, field: Option<&str>, message: impl Into<String>) {
        self.0
            .entry(field.unwrap_or(ROW_ERRORS_KEY).to_string())
            .or_default()
            .push(message.into());
    }

    pub fn push_error(&mut self, error: ValidationError) {
        self.push(error.field.as_deref(), error.message);
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        for (field, messages) in other.0 {
            self.0.entry(field).or_default().extend(messages);
        }
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn row_errors(&self) -> &[String] {
        self.get(ROW_ERRORS_KEY).unwrap_or(&[])
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.0.values().flatten().map(String::as_str)
    }

    pub fn to_map(&self) -> IndexMap<String, Vec<String>> {
        self.0.clone()
    }

    pub fn into_map(self) -> IndexMap<String, Vec<String>> {
        self.0
    }
}

/// A check run against a whole entity.
///
/// `field` is the field being validated when validation was requested for a
/// single field, `None` for a full validation.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(
        &self,
        entity: &Entity,
        field: Option<&str>,
    ) -> EntityResult<Vec<ValidationError>>;

    /// Whether validating `field` alone should run this row validator.
    fn has_field(&self, _field: &str) -> bool {
        false
    }
}

/// A registered validator plus its chaining options.
#[derive(Clone)]
pub struct ValidatorSlot {
    name: String,
    next: Option<String>,
    enabled: bool,
    validator: Arc<dyn Validator>,
}

impl ValidatorSlot {
    pub fn new(name: impl Into<String>, validator: Arc<dyn Validator>) -> Self {
        Self {
            name: name.into(),
            next: None,
            enabled: true,
            validator,
        }
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    /// Registered but never run.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn next(&self) -> Option<&str> {
        self.next.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn validator(&self) -> &Arc<dyn Validator> {
        &self.validator
    }
}

impl fmt::Debug for ValidatorSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorSlot")
            .field("name", &self.name)
            .field("next", &self.next)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Replace `{{field}}` and `{{ field }}` placeholders with the quoted value.
pub fn replace_error_message(message: &str, data: &Row) -> String {
    let mut out = message.to_string();
    for (field, value) in data {
        let quoted = format!("'{}'", value.as_text());
        out = out
            .replace(&format!("{{{{{field}}}}}"), &quoted)
            .replace(&format!("{{{{ {field} }}}}"), &quoted);
    }
    out
}
