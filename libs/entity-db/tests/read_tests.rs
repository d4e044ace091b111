//! Paged reads, filters, sorters and distinct selects over SQLite.
#![cfg(feature = "sqlite")]

mod common;

use anyhow::Result;
use common::{row, shop};
use entity_db::{EntityRegistry, Filter, ReadParams, SetOptions, SortDir, Value};
use serde_json::json;

async fn seed(registry: &EntityRegistry) -> Result<()> {
    let customers = registry.get("customer")?;
    for (code, name, city) in [("c1", "Carl", "Rome"), ("a1", "Ada", "Rome"), ("b1", "Bob", "Paris")] {
        let mut customer = customers
            .create(row(json!({"code": code, "name": name, "city": city})), SetOptions::quiet())
            .await?;
        let out = customer.save().await;
        assert!(out.is_success(), "seeding {code}: {:?}", out.errors);
    }
    Ok(())
}

fn names(rows: &[entity_db::Row]) -> Vec<String> {
    rows.iter().map(|r| r["name"].as_text()).collect()
}

#[tokio::test]
async fn test_read_all_pages_with_default_sorters() -> Result<()> {
    let registry = shop().await?;
    seed(&registry).await?;
    let customers = registry.get("customer")?;

    let params = customers.query_params(
        ReadParams::default()
            .with_filters(json!({"city": "Rome"}))
            .with_page(1, 1),
    );
    let page = customers.read_all(&params).await?;
    assert_eq!(names(&page.data), vec!["Ada"]);
    assert_eq!(page.total_records, 2);
    assert_eq!(page.total_pages, Some(2));
    assert_eq!(page.count, 1);

    let params = customers.query_params(
        ReadParams::default()
            .with_filters(json!({"city": "Rome"}))
            .with_page(2, 1),
    );
    let page = customers.read_all(&params).await?;
    assert_eq!(names(&page.data), vec!["Carl"]);
    assert_eq!(page.offset, 1);
    Ok(())
}

#[tokio::test]
async fn test_read_all_with_rule_groups_and_sorters() -> Result<()> {
    let registry = shop().await?;
    seed(&registry).await?;
    let customers = registry.get("customer")?;

    let params = customers.query_params(
        ReadParams::default()
            .with_filters(json!({
                "groupOp": "OR",
                "rules": [
                    {"field": "name", "op": "beginsWith", "data": ["B"]},
                    {"field": "code", "op": "equals", "data": ["C1"]}
                ]
            }))
            .with_sorter("name", SortDir::Desc),
    );
    let page = customers.read_all(&params).await?;
    assert_eq!(names(&page.data), vec!["Carl", "Bob"]);
    assert_eq!(page.total_records, 2);
    Ok(())
}

#[tokio::test]
async fn test_fixed_filters_narrow_the_read() -> Result<()> {
    let registry = shop().await?;
    seed(&registry).await?;
    let customers = registry.get("customer")?;

    let params = customers.query_params(
        ReadParams::default()
            .with_filters(json!({"city": "Rome"}))
            .with_fixed_filters(json!({"code": "A1"})),
    );
    let page = customers.read_all(&params).await?;
    assert_eq!(names(&page.data), vec!["Ada"]);
    assert_eq!(customers.read_count(&params).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_read_select_data_returns_distinct_values() -> Result<()> {
    let registry = shop().await?;
    seed(&registry).await?;
    let customers = registry.get("customer")?;

    let params: ReadParams = serde_json::from_value(json!({
        "selectParams": {"distinctFields": ["city"]},
        "sorters": {"city": "ASC"}
    }))?;
    let page = customers.read_select_data(&customers.query_params(params)).await?;
    let cities: Vec<Value> = page.data.iter().map(|r| r["city"].clone()).collect();
    assert_eq!(cities, vec![Value::from("Paris"), Value::from("Rome")]);
    assert_eq!(page.total_records, 2);
    assert_eq!(page.data[0].len(), 1);

    let err = customers
        .read_select_data(&customers.query_params(ReadParams::default()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("distinctFields"));
    Ok(())
}

#[tokio::test]
async fn test_read_one_by_and_typed_operands() -> Result<()> {
    let registry = shop().await?;
    seed(&registry).await?;
    let customers = registry.get("customer")?;

    let mut filter = Filter::new();
    filter.add_rule_equals("id", json!("2"))?;
    let found = customers.read_one_by(&filter).await?.expect("second customer");
    assert_eq!(found["name"], Value::from("Ada"));

    let filter = customers.parse_filters(&json!({"name": "Nobody"}))?;
    assert!(customers.read_one_by(&filter).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_unknown_sorter_is_rejected() -> Result<()> {
    let registry = shop().await?;
    let customers = registry.get("customer")?;

    let params = customers
        .query_params(ReadParams::default().with_sorter("name; DROP TABLE customers", SortDir::Asc));
    assert!(customers.read_all(&params).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_filter_operands_bypass_store_rules() -> Result<()> {
    let registry = shop().await?;
    seed(&registry).await?;
    let orders = registry.get("order")?;
    let mut order = orders
        .create(row(json!({"customer_id": 1, "amount": 0})), SetOptions::quiet())
        .await?;
    let out = order.save().await;
    assert!(out.is_success(), "{:?}", out.errors);

    // `amount` clamps to minValue 0 on store, the operand must stay -1.
    let params = orders.query_params(ReadParams::default().with_filters(json!({
        "groupOp": "AND",
        "rules": [{"field": "amount", "op": "major", "data": [-1]}]
    })));
    assert_eq!(orders.read_count(&params).await?, 1);

    let params = orders.query_params(ReadParams::default().with_filters(json!({
        "groupOp": "AND",
        "rules": [{"field": "amount", "op": "minor", "data": ["-0.5"]}]
    })));
    assert_eq!(orders.read_count(&params).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_total_records_zero_without_count() -> Result<()> {
    let registry = shop().await?;
    seed(&registry).await?;
    let customers = registry.get("customer")?;

    let params = customers.query_params(ReadParams {
        execute_count: Some(false),
        ..Default::default()
    });
    let page = customers.read_all(&params).await?;
    assert_eq!(page.count, 3);
    assert_eq!(page.total_records, 0);

    let params = customers.query_params(ReadParams::default().with_page(u64::MAX, 15));
    let page = customers.read_all(&params).await?;
    assert!(page.data.is_empty());
    assert_eq!(page.total_records, 0);
    assert_eq!(page.total_pages, Some(0));
    Ok(())
}
