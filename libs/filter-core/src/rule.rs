use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{FilterError, FilterResult};
use crate::operator::{Arity, Operator};

/// Positional bind placeholder emitted by every fragment.
pub const PLACEHOLDER: &str = "?";

/// A rendered predicate: SQL text plus its bind values, in placeholder order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SqlWhere {
    pub sql: String,
    pub values: Vec<JsonValue>,
}

impl SqlWhere {
    pub fn new(sql: impl Into<String>, values: Vec<JsonValue>) -> Self {
        Self {
            sql: sql.into(),
            values,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sql.trim().is_empty()
    }

    /// Number of `?` placeholders in the SQL text.
    pub fn placeholder_count(&self) -> usize {
        self.sql.matches(PLACEHOLDER).count()
    }
}

/// Plain-data form of a rule: `{"field": .., "op": .., "data": [..]}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleData {
    pub field: String,
    pub op: String,
    #[serde(default)]
    pub data: Vec<JsonValue>,
}

/// A single predicate on one field.
#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    field: String,
    op: Operator,
    data: Vec<JsonValue>,
}

impl Rule {
    /// Build a rule; a scalar `data` becomes a one element list.
    pub fn new(field: impl Into<String>, op: Operator, data: JsonValue) -> FilterResult<Self> {
        let field = field.into();
        validate_field_name(&field)?;
        Ok(Self {
            field,
            op,
            data: into_data_list(data),
        })
    }

    /// Same as [`Rule::new`] with the operator given by its wire name.
    pub fn parse(field: impl Into<String>, op: &str, data: JsonValue) -> FilterResult<Self> {
        Self::new(field, op.parse()?, data)
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn operator(&self) -> Operator {
        self.op
    }

    pub fn data(&self) -> &[JsonValue] {
        &self.data
    }

    pub fn set_field(&mut self, field: impl Into<String>) -> FilterResult<&mut Self> {
        let field = field.into();
        validate_field_name(&field)?;
        self.field = field;
        Ok(self)
    }

    pub fn set_operator(&mut self, op: Operator) -> &mut Self {
        self.op = op;
        self
    }

    pub fn set_data(&mut self, data: JsonValue) -> &mut Self {
        self.data = into_data_list(data);
        self
    }

    pub fn to_data(&self) -> RuleData {
        RuleData {
            field: self.field.clone(),
            op: self.op.as_str().to_string(),
            data: self.data.clone(),
        }
    }

    pub fn where_sql(&self) -> FilterResult<String> {
        Ok(self.compile()?.sql)
    }

    pub fn where_values(&self) -> FilterResult<Vec<JsonValue>> {
        Ok(self.compile()?.values)
    }

    /// Render the fragment and its bind values together so they cannot drift apart.
    pub fn compile(&self) -> FilterResult<SqlWhere> {
        let f = &self.field;
        let out = match self.op.arity() {
            Arity::None => {
                let sql = match self.op {
                    Operator::IsNull => format!("{f} IS NULL"),
                    _ => format!("{f} IS NOT NULL"),
                };
                SqlWhere::new(sql, Vec::new())
            }
            Arity::One => {
                let first = self.operand(1)?[0].clone();
                if let Some(pattern) = self.op.like_pattern(&json_text(&first)) {
                    let kw = if matches!(
                        self.op,
                        Operator::Contains | Operator::BeginsWith | Operator::EndsWith
                    ) {
                        "LIKE"
                    } else {
                        "NOT LIKE"
                    };
                    SqlWhere::new(format!("{f} {kw} ?"), vec![JsonValue::String(pattern)])
                } else {
                    let sql = match self.op {
                        Operator::Equals => format!("{f}=?"),
                        Operator::Minor => format!("{f}<?"),
                        Operator::Major => format!("{f}>?"),
                        Operator::MinorEquals => format!("{f}<=?"),
                        Operator::MajorEquals => format!("{f}>=?"),
                        _ => format!("{f}<> ?"),
                    };
                    SqlWhere::new(sql, vec![first])
                }
            }
            Arity::Two => {
                let operands = self.operand(2)?;
                SqlWhere::new(
                    format!("{f} BETWEEN ? AND ?"),
                    vec![operands[0].clone(), operands[1].clone()],
                )
            }
            Arity::List => {
                let negated = self.op == Operator::NotIn;
                if self.data.is_empty() {
                    // Nothing can be IN an empty list; everything is NOT IN it.
                    let sql = if negated { "1=1" } else { "1=0" };
                    SqlWhere::new(sql, Vec::new())
                } else {
                    let marks = vec![PLACEHOLDER; self.data.len()].join(",");
                    let kw = if negated { "NOT IN" } else { "IN" };
                    SqlWhere::new(format!("{f} {kw} ({marks})"), self.data.clone())
                }
            }
        };
        Ok(out)
    }

    fn operand(&self, needed: usize) -> FilterResult<&[JsonValue]> {
        if self.data.len() < needed {
            return Err(FilterError::MissingOperand {
                field: self.field.clone(),
                op: self.op.as_str(),
                needed,
            });
        }
        Ok(&self.data[..needed])
    }
}

impl TryFrom<RuleData> for Rule {
    type Error = FilterError;

    fn try_from(value: RuleData) -> Result<Self, Self::Error> {
        Rule::parse(value.field, &value.op, JsonValue::Array(value.data))
    }
}

impl From<&Rule> for RuleData {
    fn from(rule: &Rule) -> Self {
        rule.to_data()
    }
}

fn into_data_list(data: JsonValue) -> Vec<JsonValue> {
    match data {
        JsonValue::Array(items) => items,
        other => vec![other],
    }
}

/// Textual form of an operand, used to build LIKE patterns.
pub(crate) fn json_text(v: &JsonValue) -> String {
    match v {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(true) => "1".to_string(),
        JsonValue::Bool(false) => String::new(),
        other => other.to_string(),
    }
}

/// Field names are spliced into SQL text, so only plain (optionally dotted) identifiers pass.
pub fn validate_field_name(name: &str) -> FilterResult<()> {
    let ok = !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
                }
                _ => false,
            }
        });
    if ok {
        Ok(())
    } else {
        Err(FilterError::InvalidField(name.to_string()))
    }
}
