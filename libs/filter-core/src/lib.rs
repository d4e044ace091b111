//! Filter expression tree shared by the entity layer.
//!
//! A [`Filter`] is a node holding [`Rule`]s and child filters joined by one
//! [`Glue`], optionally negated. Both render to SQL text with positional `?`
//! placeholders plus the bind values for those placeholders, in order.
//! Parsing from (and serializing to) the plain JSON form lives here too; no
//! database code is involved.

pub mod error;
pub mod filter;
pub mod operator;
pub mod rule;

pub use error::{FilterError, FilterResult};
pub use filter::{Filter, FilterData, Glue};
pub use operator::{Arity, Operator};
pub use rule::{validate_field_name, Rule, RuleData, SqlWhere, PLACEHOLDER};
