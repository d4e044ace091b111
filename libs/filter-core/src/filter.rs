use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{FilterError, FilterResult};
use crate::operator::Operator;
use crate::rule::{Rule, RuleData, SqlWhere};

/// Boolean connective between the members of a group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Glue {
    #[default]
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

impl Glue {
    pub fn as_str(self) -> &'static str {
        match self {
            Glue::And => "AND",
            Glue::Or => "OR",
        }
    }

    fn separator(self) -> &'static str {
        match self {
            Glue::And => " AND ",
            Glue::Or => " OR ",
        }
    }
}

impl fmt::Display for Glue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Glue {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AND" => Ok(Glue::And),
            "OR" => Ok(Glue::Or),
            _ => Err(FilterError::InvalidGlue(s.to_string())),
        }
    }
}

/// Plain-data form of a filter group.
///
/// An empty filter serializes to `{}`; `groupOp` and `not` are only present
/// when the group has rules or sub groups.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterData {
    #[serde(rename = "groupOp", default, skip_serializing_if = "Option::is_none")]
    pub group_op: Option<Glue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<FilterData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<bool>,
}

/// A node of the predicate tree: rules and sub groups joined by one glue.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    rules: Vec<Rule>,
    groups: Vec<Filter>,
    glue: Glue,
    not: bool,
    default_operator: Operator,
}

impl Default for Filter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter {
    pub fn new() -> Self {
        Self::with_default_operator(Operator::Equals)
    }

    pub fn with_default_operator(default_operator: Operator) -> Self {
        Self {
            rules: Vec::new(),
            groups: Vec::new(),
            glue: Glue::And,
            not: false,
            default_operator,
        }
    }

    /// Build a filter from any of the accepted plain-data shapes:
    /// a group object (`rules` / `groups` / `not` / `groupOp`),
    /// a `field -> data` shorthand map (default operator), a map or list of
    /// rule objects carrying `field`, or `null`.
    pub fn from_value(value: &JsonValue, default_operator: Operator) -> FilterResult<Self> {
        let mut filter = Self::with_default_operator(default_operator);
        match value {
            JsonValue::Null => {}
            JsonValue::Object(map) if is_group_object(map) => filter.init_group(map)?,
            JsonValue::Object(map) => filter.init_rule_map(map)?,
            JsonValue::Array(items) => {
                for item in items {
                    match item {
                        JsonValue::Object(obj) if obj.contains_key("field") => {
                            let rule = filter.rule_from_object(obj)?;
                            filter.push_rule(rule);
                        }
                        JsonValue::Object(obj) if is_group_object(obj) => {
                            let group = Filter::from_value(item, default_operator)?;
                            filter.groups.push(group);
                        }
                        other => {
                            return Err(FilterError::InvalidRule(format!(
                                "expected a rule object, got {other}"
                            )))
                        }
                    }
                }
            }
            other => {
                return Err(FilterError::InvalidFilter(format!(
                    "unsupported filter shape: {other}"
                )))
            }
        }
        Ok(filter)
    }

    /// Shorthand for [`Filter::from_value`] with the `equals` default.
    pub fn from_json(value: &JsonValue) -> FilterResult<Self> {
        Self::from_value(value, Operator::Equals)
    }

    fn init_group(&mut self, map: &Map<String, JsonValue>) -> FilterResult<()> {
        if let Some(op) = map.get("groupOp") {
            match op {
                JsonValue::Null => {}
                JsonValue::String(s) => self.glue = s.parse()?,
                other => return Err(FilterError::InvalidGlue(other.to_string())),
            }
        }
        match map.get("rules") {
            None | Some(JsonValue::Null) => {}
            Some(JsonValue::Array(items)) => {
                for item in items {
                    let obj = item.as_object().ok_or_else(|| {
                        FilterError::InvalidRule(format!("expected a rule object, got {item}"))
                    })?;
                    let rule = self.rule_from_object(obj)?;
                    self.push_rule(rule);
                }
            }
            Some(JsonValue::Object(rules)) => self.init_rule_map(rules)?,
            Some(other) => {
                return Err(FilterError::InvalidRule(format!(
                    "rules must be a list, got {other}"
                )))
            }
        }
        match map.get("groups") {
            None | Some(JsonValue::Null) => {}
            Some(JsonValue::Array(items)) => {
                for item in items {
                    let group = Filter::from_value(item, self.default_operator)?;
                    self.groups.push(group);
                }
            }
            Some(other) => {
                return Err(FilterError::InvalidFilter(format!(
                    "groups must be a list, got {other}"
                )))
            }
        }
        if let Some(not) = map.get("not") {
            self.not = truthy(not);
        }
        Ok(())
    }

    fn init_rule_map(&mut self, map: &Map<String, JsonValue>) -> FilterResult<()> {
        for (name, data) in map {
            match data {
                JsonValue::Object(obj) if obj.contains_key("field") => {
                    let rule = self.rule_from_object(obj)?;
                    self.push_rule(rule);
                }
                other => {
                    let rule = Rule::new(name.as_str(), self.default_operator, other.clone())?;
                    self.push_rule(rule);
                }
            }
        }
        Ok(())
    }

    fn rule_from_object(&self, obj: &Map<String, JsonValue>) -> FilterResult<Rule> {
        let field = obj
            .get("field")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| FilterError::InvalidRule("rule without a field name".to_string()))?;
        let op = match obj.get("op") {
            None | Some(JsonValue::Null) => self.default_operator,
            Some(JsonValue::String(s)) => s.parse()?,
            Some(other) => return Err(FilterError::UnknownOperator(other.to_string())),
        };
        let data = obj
            .get("data")
            .cloned()
            .unwrap_or(JsonValue::Array(Vec::new()));
        Rule::new(field, op, data)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn groups(&self) -> &[Filter] {
        &self.groups
    }

    pub fn glue(&self) -> Glue {
        self.glue
    }

    pub fn is_not(&self) -> bool {
        self.not
    }

    pub fn set_rules(&mut self, rules: Vec<Rule>) -> &mut Self {
        self.rules = rules;
        self
    }

    pub fn set_groups(&mut self, groups: Vec<Filter>) -> &mut Self {
        self.groups = groups;
        self
    }

    pub fn set_glue(&mut self, glue: Glue) -> &mut Self {
        self.glue = glue;
        self
    }

    pub fn set_not(&mut self, not: bool) -> &mut Self {
        self.not = not;
        self
    }

    pub fn default_operator(&self) -> Operator {
        self.default_operator
    }

    pub fn set_default_operator(&mut self, op: Operator) -> &mut Self {
        self.default_operator = op;
        self
    }

    pub fn push_rule(&mut self, rule: Rule) -> &mut Self {
        self.rules.push(rule);
        self
    }

    /// Append a rule; `None` picks the default operator and no data.
    pub fn add_rule(
        &mut self,
        field: &str,
        op: Option<Operator>,
        data: Option<JsonValue>,
    ) -> FilterResult<&mut Self> {
        let op = op.unwrap_or(self.default_operator);
        let rule = Rule::new(field, op, data.unwrap_or(JsonValue::Array(Vec::new())))?;
        Ok(self.push_rule(rule))
    }

    pub fn add_rule_equals(&mut self, field: &str, data: JsonValue) -> FilterResult<&mut Self> {
        self.add_rule(field, Some(Operator::Equals), Some(data))
    }

    pub fn add_group(&mut self, group: Filter) -> &mut Self {
        self.groups.push(group);
        self
    }

    /// Switch every rule on `field` to `op`.
    pub fn convert_filter_rule(&mut self, field: &str, op: Operator) -> &mut Self {
        for rule in self.rules.iter_mut().filter(|r| r.field() == field) {
            rule.set_operator(op);
        }
        self
    }

    /// Rename rule fields in the whole subtree; `None` keeps the name.
    pub fn map_fields(&mut self, map: &dyn Fn(&str) -> Option<String>) -> FilterResult<()> {
        for rule in &mut self.rules {
            if let Some(name) = map(rule.field()) {
                rule.set_field(name)?;
            }
        }
        for group in &mut self.groups {
            group.map_fields(map)?;
        }
        Ok(())
    }

    /// Keep only the rules of the whole subtree that satisfy `keep`.
    pub fn retain_rules(&mut self, keep: &dyn Fn(&Rule) -> bool) {
        self.rules.retain(|r| keep(r));
        for group in &mut self.groups {
            group.retain_rules(keep);
        }
    }

    /// True when neither this node nor any descendant holds a rule.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.groups.iter().all(Filter::is_empty)
    }

    pub fn to_data(&self) -> FilterData {
        let rules: Vec<RuleData> = self.rules.iter().map(Rule::to_data).collect();
        let groups: Vec<FilterData> = self
            .groups
            .iter()
            .filter(|g| !g.is_empty())
            .map(Filter::to_data)
            .collect();
        if rules.is_empty() && groups.is_empty() {
            return FilterData::default();
        }
        FilterData {
            group_op: Some(self.glue),
            rules,
            groups,
            not: Some(self.not),
        }
    }

    pub fn to_value(&self) -> JsonValue {
        serde_json::to_value(self.to_data()).unwrap_or(JsonValue::Null)
    }

    pub fn to_sql_where(&self) -> FilterResult<String> {
        Ok(self.compile()?.sql)
    }

    pub fn to_sql_where_values(&self) -> FilterResult<Vec<JsonValue>> {
        Ok(self.compile()?.values)
    }

    /// Render this subtree. Rules come first, then sub groups, and the bind
    /// values are collected in the very same walk.
    pub fn compile(&self) -> FilterResult<SqlWhere> {
        let mut parts = Vec::with_capacity(self.rules.len() + self.groups.len());
        let mut values = Vec::new();

        for rule in &self.rules {
            let w = rule.compile()?;
            parts.push(w.sql);
            values.extend(w.values);
        }
        for group in &self.groups {
            let w = group.compile()?;
            if w.is_empty() {
                continue;
            }
            // A negated child already wraps itself in NOT(..).
            if group.not {
                parts.push(w.sql);
            } else {
                parts.push(format!(" ({}) ", w.sql));
            }
            values.extend(w.values);
        }

        if parts.is_empty() {
            return Ok(SqlWhere::default());
        }
        let joined = parts.join(self.glue.separator());
        let sql = if self.not {
            format!(" NOT({joined}) ")
        } else {
            joined
        };
        Ok(SqlWhere::new(sql, values))
    }

    /// Field and operator behind each bind value of [`Filter::compile`], in
    /// the same order, so callers can type the values per column.
    pub fn bind_targets(&self) -> FilterResult<Vec<(String, Operator)>> {
        let mut out = Vec::new();
        self.collect_bind_targets(&mut out)?;
        Ok(out)
    }

    fn collect_bind_targets(&self, out: &mut Vec<(String, Operator)>) -> FilterResult<()> {
        for rule in &self.rules {
            let n = rule.compile()?.values.len();
            out.extend((0..n).map(|_| (rule.field().to_string(), rule.operator())));
        }
        for group in self.groups.iter().filter(|g| !g.is_empty()) {
            group.collect_bind_targets(out)?;
        }
        Ok(())
    }

    /// Flat `fragment -> values` pairs for filters without sub groups.
    pub fn where_pairs(&self) -> FilterResult<Vec<(String, Vec<JsonValue>)>> {
        if self.groups.iter().any(|g| !g.is_empty()) {
            return Err(FilterError::SubGroupsNotSupported);
        }
        self.rules
            .iter()
            .map(|r| r.compile().map(|w| (w.sql, w.values)))
            .collect()
    }
}

impl TryFrom<FilterData> for Filter {
    type Error = FilterError;

    fn try_from(data: FilterData) -> Result<Self, Self::Error> {
        let mut filter = Filter::new();
        filter.glue = data.group_op.unwrap_or_default();
        filter.not = data.not.unwrap_or(false);
        for rule in data.rules {
            filter.rules.push(Rule::try_from(rule)?);
        }
        for group in data.groups {
            filter.groups.push(Filter::try_from(group)?);
        }
        Ok(filter)
    }
}

impl Serialize for Filter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_data().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Filter::from_json(&value).map_err(serde::de::Error::custom)
    }
}

fn is_group_object(map: &Map<String, JsonValue>) -> bool {
    ["rules", "groups", "not", "groupOp"]
        .iter()
        .any(|k| map.contains_key(*k))
}

fn truthy(v: &JsonValue) -> bool {
    match v {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !matches!(s.as_str(), "" | "0" | "false"),
        JsonValue::Null => false,
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}
