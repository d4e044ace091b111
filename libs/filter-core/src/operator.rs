use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FilterError;

/// Comparison operators understood by [`crate::Rule`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    #[default]
    Equals,
    Minor,
    Major,
    MinorEquals,
    MajorEquals,
    Not,
    IsNull,
    NotNull,
    In,
    NotIn,
    Between,
    Contains,
    NotContains,
    BeginsWith,
    NotBeginsWith,
    EndsWith,
    NotEndsWith,
}

/// How many bound operands an operator consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    None,
    One,
    Two,
    List,
}

impl Operator {
    pub const ALL: [Operator; 17] = [
        Operator::Equals,
        Operator::Minor,
        Operator::Major,
        Operator::MinorEquals,
        Operator::MajorEquals,
        Operator::Not,
        Operator::IsNull,
        Operator::NotNull,
        Operator::In,
        Operator::NotIn,
        Operator::Between,
        Operator::Contains,
        Operator::NotContains,
        Operator::BeginsWith,
        Operator::NotBeginsWith,
        Operator::EndsWith,
        Operator::NotEndsWith,
    ];

    /// Wire name, as used in the plain-data form.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::Minor => "minor",
            Operator::Major => "major",
            Operator::MinorEquals => "minorEquals",
            Operator::MajorEquals => "majorEquals",
            Operator::Not => "not",
            Operator::IsNull => "isNull",
            Operator::NotNull => "notNull",
            Operator::In => "in",
            Operator::NotIn => "notIn",
            Operator::Between => "between",
            Operator::Contains => "contains",
            Operator::NotContains => "notContains",
            Operator::BeginsWith => "beginsWith",
            Operator::NotBeginsWith => "notBeginsWith",
            Operator::EndsWith => "endsWith",
            Operator::NotEndsWith => "notEndsWith",
        }
    }

    pub fn arity(self) -> Arity {
        match self {
            Operator::IsNull | Operator::NotNull => Arity::None,
            Operator::In | Operator::NotIn => Arity::List,
            Operator::Between => Arity::Two,
            _ => Arity::One,
        }
    }

    /// True for the LIKE family.
    pub fn is_like(self) -> bool {
        matches!(
            self,
            Operator::Contains
                | Operator::NotContains
                | Operator::BeginsWith
                | Operator::NotBeginsWith
                | Operator::EndsWith
                | Operator::NotEndsWith
        )
    }

    /// Wrap a textual operand into the LIKE pattern of this operator.
    pub(crate) fn like_pattern(self, text: &str) -> Option<String> {
        match self {
            Operator::Contains | Operator::NotContains => Some(format!("%{text}%")),
            Operator::BeginsWith | Operator::NotBeginsWith => Some(format!("{text}%")),
            Operator::EndsWith | Operator::NotEndsWith => Some(format!("%{text}")),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| FilterError::UnknownOperator(s.to_string()))
    }
}
