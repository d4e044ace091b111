use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::error::FieldError;

/// Declared data type of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Integer,
    Numeric,
    Decimal,
    Float,
    Bool,
    Date,
    DateTime,
    Time,
}

/// Conversion family a [`FieldType`] belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Numeric,
    Integer,
    Bool,
    Date,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Numeric => "numeric",
            FieldType::Decimal => "decimal",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
            FieldType::Time => "time",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            FieldType::String => FieldKind::String,
            FieldType::Integer => FieldKind::Integer,
            FieldType::Numeric | FieldType::Decimal | FieldType::Float => FieldKind::Numeric,
            FieldType::Bool => FieldKind::Bool,
            FieldType::Date | FieldType::DateTime | FieldType::Time => FieldKind::Date,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "string" => FieldType::String,
            "integer" => FieldType::Integer,
            "numeric" => FieldType::Numeric,
            "decimal" => FieldType::Decimal,
            "float" => FieldType::Float,
            "bool" => FieldType::Bool,
            "date" => FieldType::Date,
            "datetime" => FieldType::DateTime,
            "time" => FieldType::Time,
            other => return Err(FieldError::NotImplemented(other.to_string())),
        })
    }
}

/// Declarative field options, as written in entity YAML/JSON.
///
/// Empty `columnName`, `label` and `columnType` fall back to `name`, `name`
/// and `type` once the field is built. An absent `default` means the type
/// default; an explicit `null` is kept as a null default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub id: bool,
    pub generated: bool,
    pub nullable: bool,
    #[serde(
        deserialize_with = "explicit_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub default: Option<JsonValue>,
    pub column_name: String,
    pub label: String,
    pub column_type: String,
    pub length: Option<usize>,
    pub persist: bool,
    pub required: bool,
    pub reg_exp: Option<String>,
    pub export: bool,
    pub excel_format: String,
    pub sanitize: bool,

    // string options
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub upper_case: bool,
    pub lower_case: bool,
    pub capital_case: bool,
    pub l_trim: bool,
    pub r_trim: bool,

    // numeric options
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub precision: u32,
    pub scale: u32,

    // date options
    pub format: Option<String>,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            field_type: "string".to_string(),
            id: false,
            generated: false,
            nullable: true,
            default: None,
            column_name: String::new(),
            label: String::new(),
            column_type: String::new(),
            length: None,
            persist: true,
            required: false,
            reg_exp: None,
            export: true,
            excel_format: "GENERAL".to_string(),
            sanitize: true,
            prefix: None,
            suffix: None,
            upper_case: false,
            lower_case: false,
            capital_case: false,
            l_trim: false,
            r_trim: true,
            min_value: None,
            max_value: None,
            precision: 11,
            scale: 2,
            format: None,
        }
    }
}

impl FieldConfig {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.as_str().to_string(),
            ..Default::default()
        }
    }

    /// Options of a field that is not declared by the schema.
    pub fn undeclared(name: impl Into<String>) -> Self {
        Self {
            persist: false,
            ..Self::new(name, FieldType::String)
        }
    }

    pub fn id(mut self) -> Self {
        self.id = true;
        self
    }

    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: JsonValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_column(mut self, column_name: impl Into<String>) -> Self {
        self.column_name = column_name.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }
}

fn explicit_value<'de, D: Deserializer<'de>>(d: D) -> Result<Option<JsonValue>, D::Error> {
    JsonValue::deserialize(d).map(Some)
}
