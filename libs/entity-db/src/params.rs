//! Read request parameters and paged read results.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use sea_orm::sea_query::Order;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::EntityError;

pub const DEFAULT_PAGE_SIZE: u64 = 15;

/// Sort direction; `ASC` / `DESC` in any case.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDir {
    #[default]
    #[serde(rename = "ASC", alias = "asc", alias = "Asc")]
    Asc,
    #[serde(rename = "DESC", alias = "desc", alias = "Desc")]
    Desc,
}

impl SortDir {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }

    pub fn order(self) -> Order {
        match self {
            SortDir::Asc => Order::Asc,
            SortDir::Desc => Order::Desc,
        }
    }
}

impl fmt::Display for SortDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortDir {
    type Err = EntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" => Ok(SortDir::Asc),
            "DESC" => Ok(SortDir::Desc),
            _ => Err(EntityError::InvalidParams(format!("invalid sort direction '{s}'"))),
        }
    }
}

/// Column → direction, applied in insertion order.
pub type Sorters = IndexMap<String, SortDir>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectParams {
    pub distinct_fields: Vec<String>,
}

/// Parameters of a paged read.
///
/// Numeric options accept numbers or numeric strings. Use
/// [`crate::EntityRepository::query_params`] to fill the derived ones.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadParams {
    pub filters: JsonValue,
    pub fixed_filters: JsonValue,
    pub sorters: Sorters,
    #[serde(deserialize_with = "loose_u64")]
    pub page: Option<u64>,
    #[serde(deserialize_with = "loose_u64")]
    pub page_size: Option<u64>,
    #[serde(deserialize_with = "loose_u64")]
    pub limit: Option<u64>,
    #[serde(deserialize_with = "loose_u64")]
    pub offset: Option<u64>,
    #[serde(deserialize_with = "loose_bool")]
    pub execute_count: Option<bool>,
    pub export_fields: Vec<String>,
    pub select_params: SelectParams,
}

impl ReadParams {
    pub fn with_filters(mut self, filters: JsonValue) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_fixed_filters(mut self, filters: JsonValue) -> Self {
        self.fixed_filters = filters;
        self
    }

    pub fn with_sorter(mut self, field: impl Into<String>, dir: SortDir) -> Self {
        self.sorters.insert(field.into(), dir);
        self
    }

    pub fn with_page(mut self, page: u64, page_size: u64) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self
    }

    /// Merge fixed filters, drop blank shorthand filters when empty filters
    /// are not allowed and derive `limit` / `offset` from the page.
    pub fn normalized(mut self, allow_empty_filters: bool) -> Self {
        let mut filters = std::mem::take(&mut self.filters);
        if !allow_empty_filters {
            filters = remove_empty_filters(filters);
        }
        let fixed = std::mem::take(&mut self.fixed_filters);
        self.filters = merge_filters(filters, fixed);

        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        self.page_size = Some(page_size);
        let limit = *self.limit.get_or_insert(page_size);
        let page = (*self.page.get_or_insert(1)).max(1);
        self.offset.get_or_insert((page - 1).saturating_mul(limit));
        self
    }
}

/// Shorthand maps are merged (fixed entries win); any other shape is
/// combined as two AND-ed groups.
pub fn merge_filters(filters: JsonValue, fixed: JsonValue) -> JsonValue {
    if is_blank_filter(&fixed) {
        return filters;
    }
    if is_blank_filter(&filters) {
        return fixed;
    }
    match (filters, fixed) {
        (JsonValue::Object(mut a), JsonValue::Object(b))
            if !is_group_object(&a) && !is_group_object(&b) =>
        {
            a.extend(b);
            JsonValue::Object(a)
        }
        (a, b) => serde_json::json!({"groupOp": "AND", "groups": [a, b]}),
    }
}

/// Drop `null`, `""` and `false` entries from a shorthand filter map.
pub fn remove_empty_filters(filters: JsonValue) -> JsonValue {
    match filters {
        JsonValue::Object(map) if !is_group_object(&map) => JsonValue::Object(
            map.into_iter()
                .filter(|(_, v)| !matches!(v, JsonValue::Null | JsonValue::Bool(false)) && v != "")
                .collect(),
        ),
        other => other,
    }
}

fn is_blank_filter(v: &JsonValue) -> bool {
    match v {
        JsonValue::Null => true,
        JsonValue::Object(m) => m.is_empty(),
        JsonValue::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn is_group_object(map: &Map<String, JsonValue>) -> bool {
    ["rules", "groups", "not", "groupOp"]
        .iter()
        .any(|k| map.contains_key(*k))
}

fn loose_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    use serde::de::Error;
    match JsonValue::deserialize(d)? {
        JsonValue::Null => Ok(None),
        JsonValue::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("expected a positive number, got {n}"))),
        JsonValue::String(s) if s.trim().is_empty() => Ok(None),
        JsonValue::String(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("expected a positive number, got '{s}'"))),
        other => Err(D::Error::custom(format!(
            "expected a positive number, got {other}"
        ))),
    }
}

fn loose_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    Ok(match JsonValue::deserialize(d)? {
        JsonValue::Null => None,
        JsonValue::Bool(b) => Some(b),
        JsonValue::Number(n) => Some(n.as_f64().is_some_and(|f| f != 0.0)),
        JsonValue::String(s) => Some(matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "on" | "yes"
        )),
        other => Some(!is_blank_filter(&other)),
    })
}

/// One page of a read, with the totals needed for paging.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadPage<T> {
    /// Rows in this page.
    pub count: u64,
    pub total_records: u64,
    pub page: u64,
    /// `None` when the read was not limited.
    pub total_pages: Option<u64>,
    pub data: Vec<T>,
    pub offset: u64,
    pub limit: u64,
}

impl<T> ReadPage<T> {
    pub fn new(data: Vec<T>, total_records: u64, page: u64, offset: u64, limit: u64) -> Self {
        let total_pages = (limit > 0).then(|| total_records.div_ceil(limit));
        Self {
            count: data.len() as u64,
            total_records,
            page,
            total_pages,
            data,
            offset,
            limit,
        }
    }

    pub fn map_items<U>(self, f: impl FnMut(T) -> U) -> ReadPage<U> {
        ReadPage {
            count: self.count,
            total_records: self.total_records,
            page: self.page,
            total_pages: self.total_pages,
            data: self.data.into_iter().map(f).collect(),
            offset: self.offset,
            limit: self.limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalized_derives_paging() {
        let p: ReadParams = serde_json::from_value(json!({"page": "3", "pageSize": 10})).unwrap();
        let p = p.normalized(true);
        assert_eq!(p.limit, Some(10));
        assert_eq!(p.offset, Some(20));

        let p = ReadParams::default().normalized(true);
        assert_eq!(p.page_size, Some(DEFAULT_PAGE_SIZE));
        assert_eq!(p.limit, Some(DEFAULT_PAGE_SIZE));
        assert_eq!(p.page, Some(1));
        assert_eq!(p.offset, Some(0));

        let p = ReadParams {
            limit: Some(0),
            ..Default::default()
        }
        .normalized(true);
        assert_eq!(p.limit, Some(0));
    }

    #[test]
    fn test_huge_page_saturates_offset() {
        let p: ReadParams =
            serde_json::from_value(json!({"page": u64::MAX, "pageSize": 15})).unwrap();
        let p = p.normalized(true);
        assert_eq!(p.offset, Some(u64::MAX));
        assert_eq!(p.limit, Some(15));
    }

    #[test]
    fn test_fixed_filters_are_merged() {
        let p = ReadParams::default()
            .with_filters(json!({"name": "x", "city": ""}))
            .with_fixed_filters(json!({"tenant": 7}))
            .normalized(false);
        assert_eq!(p.filters, json!({"name": "x", "tenant": 7}));
        assert_eq!(p.fixed_filters, JsonValue::Null);

        let p = ReadParams::default()
            .with_filters(json!({"groupOp": "OR", "rules": [{"field": "a", "op": "equals", "data": [1]}]}))
            .with_fixed_filters(json!({"tenant": 7}))
            .normalized(true);
        assert_eq!(p.filters["groupOp"], json!("AND"));
        assert_eq!(p.filters["groups"][1], json!({"tenant": 7}));
    }

    #[test]
    fn test_empty_filters_kept_when_allowed() {
        let p = ReadParams::default()
            .with_filters(json!({"city": ""}))
            .normalized(true);
        assert_eq!(p.filters, json!({"city": ""}));
    }

    #[test]
    fn test_sorters_and_flags() {
        let p: ReadParams = serde_json::from_value(json!({
            "sorters": {"name": "asc", "id": "DESC"},
            "executeCount": 0,
            "selectParams": {"distinctFields": ["city"]}
        }))
        .unwrap();
        assert_eq!(p.sorters.get("name"), Some(&SortDir::Asc));
        assert_eq!(p.sorters.get("id"), Some(&SortDir::Desc));
        assert_eq!(p.execute_count, Some(false));
        assert_eq!(p.select_params.distinct_fields, vec!["city"]);
        assert!(serde_json::from_value::<ReadParams>(json!({"page": "x"})).is_err());
    }

    #[test]
    fn test_page_totals() {
        let page = ReadPage::new(vec![1, 2], 21, 1, 0, 10);
        assert_eq!(page.total_pages, Some(3));
        assert_eq!(page.count, 2);
        let page = ReadPage::new(vec![1], 1, 1, 0, 0);
        assert_eq!(page.total_pages, None);
        let page = page.map_items(|i| i * 10);
        assert_eq!(page.data, vec![10]);
        assert_eq!(
            serde_json::to_value(&page).unwrap()["totalRecords"],
            json!(1)
        );
    }
}
