//! Field definitions and per-type value normalization.
//!
//! A [`Field`] is built from a [`FieldConfig`] and owns the conversion
//! pipeline for its type: `convert` normalizes a value before it is stored
//! on an entity, `unconvert` turns a stored value back into its presentation
//! form.

mod boolean;
mod config;
mod date;
mod numeric;
mod string;

use std::sync::Arc;

use regex::Regex;

use crate::error::FieldError;
use crate::validator::{FieldNotBlankValidator, ValidatorSlot};
use crate::value::{truthy, Value};

pub use config::{FieldConfig, FieldKind, FieldType};
pub(crate) use numeric::parse_integer;

/// A typed, configured entity field.
#[derive(Clone, Debug)]
pub struct Field {
    config: FieldConfig,
    field_type: FieldType,
    default: Value,
    reg_exp: Option<Regex>,
    validators: Vec<ValidatorSlot>,
}

impl Field {
    pub fn new(mut config: FieldConfig) -> Result<Self, FieldError> {
        if config.name.is_empty() {
            return Err(FieldError::MissingName);
        }
        let field_type: FieldType = config.field_type.parse()?;
        if config.column_name.is_empty() {
            config.column_name = config.name.clone();
        }
        if config.label.is_empty() {
            config.label = config.name.clone();
        }
        if config.column_type.is_empty() {
            config.column_type = config.field_type.clone();
        }
        let reg_exp = match config.reg_exp.as_deref().filter(|r| !r.is_empty()) {
            Some(pattern) => Some(compile_reg_exp(&config.name, pattern)?),
            None => None,
        };

        let mut field = Self {
            config,
            field_type,
            default: Value::Null,
            reg_exp,
            validators: Vec::new(),
        };

        field.default = if field.config.generated {
            Value::Null
        } else {
            match field.config.default.clone() {
                None => field.type_default(),
                Some(json) => field.convert(&Value::from(json))?,
            }
        };

        if field.config.required {
            let not_blank = FieldNotBlankValidator::new(field.name());
            field
                .validators
                .push(ValidatorSlot::new("required", Arc::new(not_blank)));
        }
        Ok(field)
    }

    /// A non persisted string field, used for keys set on an entity that
    /// its schema does not declare.
    pub fn undeclared(name: &str) -> Self {
        let mut config = FieldConfig::undeclared(name);
        config.column_name = name.to_string();
        config.label = name.to_string();
        config.column_type = config.field_type.clone();
        Self {
            config,
            field_type: FieldType::String,
            default: Value::from(""),
            reg_exp: None,
            validators: Vec::new(),
        }
    }

    fn type_default(&self) -> Value {
        match self.kind() {
            FieldKind::String => Value::from(""),
            FieldKind::Numeric => Value::Float(0.0),
            FieldKind::Integer => Value::Int(0),
            FieldKind::Bool => Value::Bool(false),
            FieldKind::Date => Value::Null,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn column_name(&self) -> &str {
        &self.config.column_name
    }

    pub fn label(&self) -> &str {
        &self.config.label
    }

    pub fn column_type(&self) -> &str {
        &self.config.column_type
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn kind(&self) -> FieldKind {
        self.field_type.kind()
    }

    pub fn is_id(&self) -> bool {
        self.config.id
    }

    pub fn is_generated(&self) -> bool {
        self.config.generated
    }

    pub fn is_nullable(&self) -> bool {
        self.config.nullable
    }

    pub fn persist(&self) -> bool {
        self.config.persist
    }

    pub fn is_required(&self) -> bool {
        self.config.required
    }

    pub fn sanitize(&self) -> bool {
        self.config.sanitize
    }

    pub fn length(&self) -> Option<usize> {
        self.config.length.filter(|l| *l > 0)
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    pub fn config(&self) -> &FieldConfig {
        &self.config
    }

    /// Effective configuration, with the resolved default.
    pub fn to_config(&self) -> FieldConfig {
        let mut cfg = self.config.clone();
        cfg.default = Some(self.default.to_json());
        cfg
    }

    pub fn validators(&self) -> &[ValidatorSlot] {
        &self.validators
    }

    pub fn add_validator(&mut self, slot: ValidatorSlot) -> &mut Self {
        self.validators.push(slot);
        self
    }

    pub fn with_validator(mut self, slot: ValidatorSlot) -> Self {
        self.validators.push(slot);
        self
    }

    /// Normalize a value before it is stored on the entity.
    pub fn convert(&self, value: &Value) -> Result<Value, FieldError> {
        match self.kind() {
            FieldKind::String => Ok(self.convert_string(value)),
            FieldKind::Numeric => Ok(self.convert_numeric(value)),
            FieldKind::Integer => Ok(self.convert_integer(value)),
            FieldKind::Bool => Ok(self.convert_bool(value)),
            FieldKind::Date => self.convert_date(value),
        }
    }

    /// Parse a value into this field's type only. Unlike [`Field::convert`]
    /// no clamping, length, `regExp`, case or affix rules apply.
    pub fn coerce(&self, value: &Value) -> Result<Value, FieldError> {
        match self.kind() {
            FieldKind::String => Ok(match value {
                Value::Null => Value::Null,
                v => Value::String(v.as_text()),
            }),
            FieldKind::Numeric => Ok(self.coerce_numeric(value)),
            FieldKind::Integer => Ok(self.coerce_integer(value)),
            FieldKind::Bool => Ok(self.convert_bool(value)),
            FieldKind::Date => self.convert_date(value),
        }
    }

    /// Presentation form of a stored value.
    pub fn unconvert(&self, value: &Value) -> Value {
        match self.kind() {
            FieldKind::String => self.unconvert_string(value),
            FieldKind::Numeric => self.unconvert_numeric(value),
            FieldKind::Integer => self.unconvert_integer(value),
            FieldKind::Bool => self.unconvert_bool(value),
            FieldKind::Date => self.unconvert_date(value),
        }
    }

    pub fn is_empty(&self, value: &Value) -> bool {
        match self.kind() {
            FieldKind::String => match value {
                Value::Null => true,
                v => v.as_text().trim().is_empty(),
            },
            FieldKind::Numeric | FieldKind::Integer => {
                value.is_blank() || numeric::parse_number(&value.as_text()) == 0.0
            }
            FieldKind::Bool => !truthy(value),
            FieldKind::Date => value.is_blank(),
        }
    }

    /// Drop every character that does not match `regExp`.
    pub fn apply_reg_exp(&self, text: &str) -> String {
        match &self.reg_exp {
            Some(re) => text
                .chars()
                .filter(|c| {
                    let mut buf = [0u8; 4];
                    re.is_match(c.encode_utf8(&mut buf))
                })
                .collect(),
            None => text.to_string(),
        }
    }

    pub fn apply_max_length(&self, text: &str) -> String {
        match self.length() {
            Some(max) if text.chars().count() > max => text.chars().take(max).collect(),
            _ => text.to_string(),
        }
    }

    fn has_text_rules(&self) -> bool {
        self.reg_exp.is_some() || self.length().is_some()
    }

    fn apply_text_rules(&self, text: &str) -> String {
        self.apply_max_length(&self.apply_reg_exp(text))
    }
}

/// Accepts both a bare pattern and the delimited `/pattern/flags` form.
fn compile_reg_exp(field: &str, raw: &str) -> Result<Regex, FieldError> {
    let (pattern, flags) = match raw.strip_prefix('/').and_then(|rest| {
        rest.rfind('/').map(|end| (&rest[..end], &rest[end + 1..]))
    }) {
        Some(parts) => parts,
        None => (raw, ""),
    };
    let inline: String = flags
        .chars()
        .filter(|f| matches!(f, 'i' | 'm' | 's' | 'x'))
        .collect();
    let full = if inline.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{inline}){pattern}")
    };
    Regex::new(&full).map_err(|e| FieldError::InvalidRegExp {
        field: field.to_string(),
        message: e.to_string(),
    })
}
