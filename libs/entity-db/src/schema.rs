//! Entity schemas: fields, keys, sorters, validators and hooks of one table.

use std::borrow::Cow;
use std::sync::Arc;

use filter_core::Operator;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{EntityError, EntityResult};
use crate::field::{Field, FieldConfig};
use crate::hooks::{EntityHooks, NoHooks};
use crate::params::SortDir;
use crate::repository::EntityRepository;
use crate::validator::{
    ForeignKeyField, ForeignKeyValidator, UniqueKeyGroup, UniqueKeyValidator, ValidatorSlot,
};

/// Name of the row validator that enforces unique keys.
pub const UNIQUE_KEYS_VALIDATOR: &str = "uniqueKeys";

/// Immutable description of an entity, shared by its repository and entities.
pub struct EntitySchema {
    name: String,
    schema_name: Option<String>,
    table_name: String,
    fields: IndexMap<String, Field>,
    unique_keys: Vec<UniqueKeyGroup>,
    default_sorters: IndexMap<String, SortDir>,
    row_validators: Vec<ValidatorSlot>,
    hooks: Arc<dyn EntityHooks>,
    allow_empty_filters: bool,
    default_filter_operator: Operator,
}

impl std::fmt::Debug for EntitySchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitySchema")
            .field("name", &self.name)
            .field("table_name", &self.table_name)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("row_validators", &self.row_validators)
            .finish_non_exhaustive()
    }
}

impl EntitySchema {
    pub fn builder(name: impl Into<String>, table_name: impl Into<String>) -> EntitySchemaBuilder {
        EntitySchemaBuilder::new(name, table_name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema_name(&self) -> Option<&str> {
        self.schema_name.as_deref()
    }

    /// Table name, qualified by the schema name when one is set.
    pub fn table_name(&self, with_schema: bool) -> String {
        match (&self.schema_name, with_schema) {
            (Some(schema), true) => format!("{schema}.{}", self.table_name),
            _ => self.table_name.clone(),
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn field_by_column(&self, column: &str) -> Option<&Field> {
        self.fields.values().find(|f| f.column_name() == column)
    }

    /// Declared field, or a non persisted string field for unknown names.
    pub fn field_or_undeclared(&self, name: &str) -> Cow<'_, Field> {
        match self.fields.get(name) {
            Some(f) => Cow::Borrowed(f),
            None => Cow::Owned(Field::undeclared(name)),
        }
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn db_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values().filter(|f| f.persist())
    }

    /// Identity field names, in declaration order.
    pub fn identity(&self, only_generated: bool) -> Vec<&str> {
        self.fields
            .values()
            .filter(|f| f.is_id() && (!only_generated || f.is_generated()))
            .map(Field::name)
            .collect()
    }

    pub fn identity_column_names(&self, only_generated: bool) -> Vec<&str> {
        self.fields
            .values()
            .filter(|f| f.is_id() && (!only_generated || f.is_generated()))
            .map(Field::column_name)
            .collect()
    }

    pub fn identity_sequence_name(&self) -> String {
        format!(
            "{}_{}_seq",
            self.table_name(true),
            self.identity_column_names(true).join("_")
        )
    }

    pub fn unique_keys(&self) -> &[UniqueKeyGroup] {
        &self.unique_keys
    }

    pub fn default_sorters(&self) -> &IndexMap<String, SortDir> {
        &self.default_sorters
    }

    pub fn row_validators(&self) -> &[ValidatorSlot] {
        &self.row_validators
    }

    pub fn row_validator_index(&self, name: &str) -> Option<usize> {
        self.row_validators.iter().position(|s| s.name() == name)
    }

    pub fn hooks(&self) -> &Arc<dyn EntityHooks> {
        &self.hooks
    }

    pub fn allow_empty_filters(&self) -> bool {
        self.allow_empty_filters
    }

    pub fn default_filter_operator(&self) -> Operator {
        self.default_filter_operator
    }
}

/// Builds an [`EntitySchema`] in code.
pub struct EntitySchemaBuilder {
    name: String,
    schema_name: Option<String>,
    table_name: String,
    fields: Vec<Field>,
    field_configs: Vec<FieldConfig>,
    unique_keys: Vec<UniqueKeyGroup>,
    default_sorters: IndexMap<String, SortDir>,
    row_validators: Vec<ValidatorSlot>,
    hooks: Arc<dyn EntityHooks>,
    allow_empty_filters: bool,
    default_filter_operator: Operator,
}

impl EntitySchemaBuilder {
    pub fn new(name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema_name: None,
            table_name: table_name.into(),
            fields: Vec::new(),
            field_configs: Vec::new(),
            unique_keys: Vec::new(),
            default_sorters: IndexMap::new(),
            row_validators: Vec::new(),
            hooks: Arc::new(NoHooks),
            allow_empty_filters: true,
            default_filter_operator: Operator::Equals,
        }
    }

    pub fn schema_name(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = Some(schema_name.into()).filter(|s: &String| !s.is_empty());
        self
    }

    pub fn field(mut self, config: FieldConfig) -> Self {
        self.field_configs.push(config);
        self
    }

    /// Add an already built field, e.g. one carrying extra validators.
    pub fn built_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn unique_key(mut self, group: UniqueKeyGroup) -> Self {
        self.unique_keys.push(group);
        self
    }

    pub fn default_sorter(mut self, field: impl Into<String>, dir: SortDir) -> Self {
        self.default_sorters.insert(field.into(), dir);
        self
    }

    pub fn row_validator(mut self, slot: ValidatorSlot) -> Self {
        self.row_validators.push(slot);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn EntityHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn allow_empty_filters(mut self, allow: bool) -> Self {
        self.allow_empty_filters = allow;
        self
    }

    pub fn default_filter_operator(mut self, op: Operator) -> Self {
        self.default_filter_operator = op;
        self
    }

    pub fn build(self) -> EntityResult<Arc<EntitySchema>> {
        if self.table_name.is_empty() {
            return Err(EntityError::Config(format!(
                "entity {} has no table name",
                self.name
            )));
        }
        let mut fields = IndexMap::new();
        let built = self
            .field_configs
            .into_iter()
            .map(Field::new)
            .collect::<Result<Vec<_>, _>>()?;
        for field in built.into_iter().chain(self.fields) {
            let name = field.name().to_string();
            if fields.insert(name.clone(), field).is_some() {
                return Err(EntityError::Config(format!(
                    "field {name} declared twice in entity {}",
                    self.name
                )));
            }
        }

        for key in self.unique_keys.iter().flat_map(|g| &g.fields) {
            if !fields.contains_key(&key.name) {
                return Err(EntityError::UnknownField(key.name.clone()));
            }
        }
        for name in self.default_sorters.keys() {
            filter_core::validate_field_name(name)?;
        }

        let mut row_validators = self.row_validators;
        if !self.unique_keys.is_empty() {
            let validator = UniqueKeyValidator::new(self.unique_keys.clone());
            row_validators.push(ValidatorSlot::new(
                UNIQUE_KEYS_VALIDATOR,
                Arc::new(validator),
            ));
        }

        Ok(Arc::new(EntitySchema {
            name: self.name,
            schema_name: self.schema_name,
            table_name: self.table_name,
            fields,
            unique_keys: self.unique_keys,
            default_sorters: self.default_sorters,
            row_validators,
            hooks: self.hooks,
            allow_empty_filters: self.allow_empty_filters,
            default_filter_operator: self.default_filter_operator,
        }))
    }
}

/// A foreign key declared in configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyConfig {
    /// Name of the referenced entity.
    pub entity: String,
    pub fields: Vec<ForeignKeyField>,
    /// Validator name; defaults to `fk_<entity>`.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Declarative entity schema, as found under `entities` in the config file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EntitySchemaConfig {
    #[serde(default)]
    pub schema_name: Option<String>,
    pub table_name: String,
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub unique_keys: Vec<UniqueKeyGroup>,
    #[serde(default)]
    pub default_sorters: IndexMap<String, SortDir>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyConfig>,
    #[serde(default = "default_true")]
    pub allow_empty_filters: bool,
    #[serde(default)]
    pub default_filter_operator: Operator,
}

fn default_true() -> bool {
    true
}

impl EntitySchemaConfig {
    /// Names of the entities this one references.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.foreign_keys.iter().map(|fk| fk.entity.as_str())
    }

    /// Build the schema; `resolve` returns the repository of a referenced
    /// entity.
    pub fn into_builder(
        self,
        name: &str,
        resolve: &dyn Fn(&str) -> Option<EntityRepository>,
    ) -> EntityResult<EntitySchemaBuilder> {
        let mut builder = EntitySchema::builder(name, self.table_name)
            .allow_empty_filters(self.allow_empty_filters)
            .default_filter_operator(self.default_filter_operator);
        if let Some(schema_name) = self.schema_name {
            builder = builder.schema_name(schema_name);
        }
        for field in self.fields {
            builder = builder.field(field);
        }
        for group in self.unique_keys {
            builder = builder.unique_key(group);
        }
        for (field, dir) in self.default_sorters {
            builder = builder.default_sorter(field, dir);
        }
        for fk in self.foreign_keys {
            let repository =
                resolve(&fk.entity).ok_or_else(|| EntityError::UnknownEntity(fk.entity.clone()))?;
            let mut validator = ForeignKeyValidator::new(fk.fields, repository);
            if let Some(message) = fk.message {
                validator = validator.with_message(message);
            }
            let slot_name = fk.name.unwrap_or_else(|| format!("fk_{}", fk.entity));
            let mut slot = ValidatorSlot::new(slot_name, Arc::new(validator));
            if let Some(next) = fk.next {
                slot = slot.with_next(next);
            }
            builder = builder.row_validator(slot);
        }
        Ok(builder)
    }

    pub fn build(
        self,
        name: &str,
        resolve: &dyn Fn(&str) -> Option<EntityRepository>,
    ) -> EntityResult<Arc<EntitySchema>> {
        self.into_builder(name, resolve)?.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use serde_json::json;

    fn no_repos(_: &str) -> Option<EntityRepository> {
        None
    }

    #[test]
    fn test_builder_resolves_fields_and_unique_validator() {
        let schema = EntitySchema::builder("customer", "customers")
            .schema_name("crm")
            .field(FieldConfig::new("id", FieldType::Integer).id().generated())
            .field(FieldConfig::new("code", FieldType::String).with_column("cust_code"))
            .unique_key(UniqueKeyGroup::new(["code"]))
            .build()
            .unwrap();

        assert_eq!(schema.table_name(true), "crm.customers");
        assert_eq!(schema.table_name(false), "customers");
        assert_eq!(schema.identity(false), vec!["id"]);
        assert_eq!(schema.identity_sequence_name(), "crm.customers_id_seq");
        assert_eq!(schema.field_by_column("cust_code").unwrap().name(), "code");
        assert_eq!(schema.row_validators().len(), 1);
        assert_eq!(schema.row_validators()[0].name(), UNIQUE_KEYS_VALIDATOR);
        assert!(!schema.field_or_undeclared("extra").persist());
    }

    #[test]
    fn test_unknown_unique_key_field_is_rejected() {
        let err = EntitySchema::builder("customer", "customers")
            .field(FieldConfig::new("id", FieldType::Integer).id())
            .unique_key(UniqueKeyGroup::new(["missing"]))
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "Field missing not found");
    }

    #[test]
    fn test_duplicate_field_is_rejected() {
        let err = EntitySchema::builder("customer", "customers")
            .field(FieldConfig::new("id", FieldType::Integer))
            .field(FieldConfig::new("id", FieldType::String))
            .build()
            .unwrap_err();
        assert!(matches!(err, EntityError::Config(_)));
    }

    #[test]
    fn test_schema_from_config() {
        let cfg: EntitySchemaConfig = serde_json::from_value(json!({
            "tableName": "orders",
            "fields": [
                {"name": "id", "type": "integer", "id": true, "generated": true},
                {"name": "number", "required": true}
            ],
            "uniqueKeys": [["number"]],
            "defaultSorters": {"number": "desc"},
            "allowEmptyFilters": false,
            "defaultFilterOperator": "contains"
        }))
        .unwrap();
        let schema = cfg.build("order", &no_repos).unwrap();
        assert_eq!(schema.default_sorters().get("number"), Some(&SortDir::Desc));
        assert!(!schema.allow_empty_filters());
        assert_eq!(schema.default_filter_operator(), Operator::Contains);
        assert_eq!(schema.field("number").unwrap().validators().len(), 1);
    }

    #[test]
    fn test_missing_foreign_entity() {
        let cfg: EntitySchemaConfig = serde_json::from_value(json!({
            "tableName": "orders",
            "fields": [{"name": "customer_id", "type": "integer"}],
            "foreignKeys": [{"entity": "customer", "fields": [{"name": "customer_id", "fkName": "id"}]}]
        }))
        .unwrap();
        let err = cfg.build("order", &no_repos).unwrap_err();
        assert_eq!(err.to_string(), "Entity customer not found");
    }
}
