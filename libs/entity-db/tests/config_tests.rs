//! Tests for the configuration types, as they come out of Figment.

use std::time::Duration;

use entity_db::{DbConnConfig, EntitySchemaConfig, FieldType, Operator, SortDir};
use figment::providers::{Format, Yaml};
use figment::Figment;

const CONFIG: &str = r#"
database:
  dsn: "sqlite://shop.db?wal=true"
  pool:
    max_conns: 4
    acquire_timeout: 5s
customer:
  schemaName: crm
  tableName: customers
  defaultFilterOperator: contains
  allowEmptyFilters: false
  fields:
    - { name: id, type: integer, id: true, generated: true }
    - { name: code, type: string, length: 8, upperCase: true, columnName: cust_code }
    - { name: born, type: date, format: "%d/%m/%Y" }
  uniqueKeys:
    - [code]
  defaultSorters:
    code: desc
"#;

#[test]
fn test_database_section() {
    let db: DbConnConfig = Figment::new()
        .merge(Yaml::string(CONFIG))
        .extract_inner("database")
        .unwrap();
    assert_eq!(db.dsn, "sqlite://shop.db?wal=true");
    assert_eq!(db.pool.max_conns, Some(4));
    assert_eq!(db.pool.acquire_timeout, Some(Duration::from_secs(5)));
}

#[test]
fn test_entity_section_builds_schema() {
    let cfg: EntitySchemaConfig = Figment::new()
        .merge(Yaml::string(CONFIG))
        .extract_inner("customer")
        .unwrap();
    assert!(!cfg.allow_empty_filters);
    assert_eq!(cfg.default_filter_operator, Operator::Contains);
    assert_eq!(cfg.default_sorters.get("code"), Some(&SortDir::Desc));

    let schema = cfg.build("customer", &|_| None).unwrap();
    assert_eq!(schema.table_name(true), "crm.customers");
    let code = schema.field("code").unwrap();
    assert_eq!(code.column_name(), "cust_code");
    assert_eq!(code.length(), Some(8));
    assert_eq!(schema.field("born").unwrap().field_type(), FieldType::Date);
    assert_eq!(schema.identity(true), vec!["id"]);
}

#[test]
fn test_unknown_entity_keys_are_rejected() {
    let err = serde_yaml::from_str::<EntitySchemaConfig>("tableName: t\nfields: []\ncolour: red\n")
        .unwrap_err();
    assert!(err.to_string().contains("colour"));
}
