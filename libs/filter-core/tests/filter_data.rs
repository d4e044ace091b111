//! Parsing filters from their plain JSON shapes and serializing them back.

use filter_core::{Filter, FilterData, FilterError, Glue, Operator};
use serde_json::json;

#[test]
fn test_group_object_round_trip() {
    let input = json!({
        "groupOp": "OR",
        "rules": [
            {"field": "name", "op": "contains", "data": ["ann"]},
            {"field": "age", "op": "between", "data": [20, 30]}
        ],
        "groups": [
            {"groupOp": "AND", "rules": [{"field": "city", "op": "equals", "data": ["Rome"]}], "not": true}
        ],
        "not": false
    });

    let filter = Filter::from_json(&input).unwrap();
    assert_eq!(filter.glue(), Glue::Or);
    assert_eq!(filter.rules().len(), 2);
    assert_eq!(filter.groups().len(), 1);
    assert!(filter.groups()[0].is_not());

    assert_eq!(filter.to_value(), input);
}

#[test]
fn test_group_op_is_honoured() {
    let f = Filter::from_json(&json!({
        "groupOp": "or",
        "rules": [{"field": "a", "data": [1]}, {"field": "b", "data": [2]}]
    }))
    .unwrap();
    assert_eq!(f.to_sql_where().unwrap(), "a=? OR b=?");
}

#[test]
fn test_shorthand_map_uses_default_operator() {
    let f = Filter::from_value(&json!({"name": "bob", "city": ["Rome"]}), Operator::Contains)
        .unwrap();
    let w = f.compile().unwrap();
    assert_eq!(w.sql, "name LIKE ? AND city LIKE ?");
    assert_eq!(w.values, vec![json!("%bob%"), json!("%Rome%")]);
}

#[test]
fn test_map_entries_may_be_rule_objects() {
    let f = Filter::from_json(&json!({
        "x": {"field": "age", "op": "majorEquals", "data": 18},
        "name": "bob"
    }))
    .unwrap();
    let w = f.compile().unwrap();
    assert_eq!(w.sql, "age>=? AND name=?");
    assert_eq!(w.values, vec![json!(18), json!("bob")]);
}

#[test]
fn test_list_of_rule_objects() {
    let f = Filter::from_json(&json!([
        {"field": "id", "op": "in", "data": [1, 2]},
        {"field": "deleted", "op": "isNull"}
    ]))
    .unwrap();
    assert_eq!(f.to_sql_where().unwrap(), "id IN (?,?) AND deleted IS NULL");
}

#[test]
fn test_nested_groups_inherit_default_operator() {
    let f = Filter::from_value(
        &json!({"groups": [{"rules": [{"field": "n", "data": ["x"]}]}]}),
        Operator::BeginsWith,
    )
    .unwrap();
    assert_eq!(f.groups()[0].default_operator(), Operator::BeginsWith);
    assert_eq!(f.groups()[0].rules()[0].operator(), Operator::BeginsWith);
}

#[test]
fn test_null_and_empty_inputs() {
    assert!(Filter::from_json(&json!(null)).unwrap().is_empty());
    assert!(Filter::from_json(&json!({})).unwrap().is_empty());
    assert!(Filter::from_json(&json!([])).unwrap().is_empty());
}

#[test]
fn test_bad_inputs() {
    assert!(matches!(
        Filter::from_json(&json!({"rules": [{"field": "a", "op": "sortOf", "data": [1]}]})),
        Err(FilterError::UnknownOperator(op)) if op == "sortOf"
    ));
    assert!(matches!(
        Filter::from_json(&json!({"groupOp": "XOR", "rules": []})),
        Err(FilterError::InvalidGlue(_))
    ));
    assert!(matches!(
        Filter::from_json(&json!({"a b": 1})),
        Err(FilterError::InvalidField(_))
    ));
    assert!(matches!(
        Filter::from_json(&json!(42)),
        Err(FilterError::InvalidFilter(_))
    ));
}

#[test]
fn test_serde_impls() {
    let f: Filter = serde_json::from_value(json!({"rules": [{"field": "a", "data": [1]}]})).unwrap();
    let back = serde_json::to_value(&f).unwrap();
    assert_eq!(
        back,
        json!({"groupOp": "AND", "rules": [{"field": "a", "op": "equals", "data": [1]}], "not": false})
    );

    let data: FilterData = serde_json::from_value(back).unwrap();
    let again = Filter::try_from(data).unwrap();
    assert_eq!(again, f);
}

#[test]
fn test_placeholders_match_values_for_deep_trees() {
    let f = Filter::from_json(&json!({
        "rules": [{"field": "a", "op": "in", "data": [1, 2, 3]}],
        "groups": [
            {"groupOp": "OR", "rules": [
                {"field": "b", "op": "between", "data": [1, 9]},
                {"field": "c", "op": "notIn", "data": []}
            ], "groups": [
                {"rules": [{"field": "d", "op": "endsWith", "data": ["z"]}], "not": true}
            ]}
        ]
    }))
    .unwrap();
    let w = f.compile().unwrap();
    assert_eq!(w.placeholder_count(), w.values.len());
    assert_eq!(
        w.values,
        vec![json!(1), json!(2), json!(3), json!(1), json!(9), json!("%z")]
    );
}
