#![allow(dead_code)]
use anyhow::Result;
use entity_db::value::row_from_json;
use entity_db::{ConnectOpts, DbHandle, EntityRegistry, EntitySchemaConfig, Row};
use indexmap::IndexMap;
use serde_json::json;

pub async fn memory_db() -> Result<DbHandle> {
    Ok(DbHandle::connect("sqlite::memory:", ConnectOpts::default()).await?)
}

/// `customer` with a unique `code`, and `order` referencing it.
pub fn shop_config() -> IndexMap<String, EntitySchemaConfig> {
    serde_json::from_value(json!({
        "order": {
            "tableName": "orders",
            "fields": [
                {"name": "id", "type": "integer", "id": true, "generated": true},
                {"name": "customer_id", "type": "integer", "label": "Customer"},
                {"name": "amount", "type": "numeric", "minValue": 0}
            ],
            "foreignKeys": [
                {"entity": "customer", "fields": [{"name": "customer_id", "fkName": "id"}]}
            ]
        },
        "customer": {
            "tableName": "customers",
            "fields": [
                {"name": "id", "type": "integer", "id": true, "generated": true},
                {"name": "code", "type": "string", "length": 10, "required": true, "upperCase": true},
                {"name": "name", "type": "string", "required": true},
                {"name": "city", "type": "string"},
                {"name": "credit", "type": "numeric", "nullable": false},
                {"name": "active", "type": "bool", "default": true},
                {"name": "born", "type": "date"},
                {"name": "insert_time", "type": "datetime"}
            ],
            "uniqueKeys": [{"fields": ["code"]}],
            "defaultSorters": {"name": "ASC"}
        }
    }))
    .expect("valid shop config")
}

/// Registry over a fresh in-memory database with every table created.
pub async fn shop() -> Result<EntityRegistry> {
    let registry = EntityRegistry::from_config(memory_db().await?, &shop_config())?;
    registry.init_all().await?;
    Ok(registry)
}

pub fn row(value: serde_json::Value) -> Row {
    row_from_json(&value).expect("object row")
}
