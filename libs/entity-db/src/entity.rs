//! Active record over one row of an entity schema.
//!
//! An [`Entity`] holds converted field values, the data it was first loaded
//! with and the identity of the stored row it maps to. Writes return an
//! [`Outcome`]; validation failures never surface as `Err`.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{Local, SubsecRound};
use filter_core::{Filter, Operator};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::error::{EntityError, EntityResult};
use crate::field::{Field, FieldConfig};
use crate::outcome::Outcome;
use crate::repository::EntityRepository;
use crate::schema::EntitySchema;
use crate::validator::{ValidationError, ValidationErrors};
use crate::value::{row_to_json, Row, Value};

pub const INSERT_USER_FIELD: &str = "insert_user";
pub const INSERT_TIME_FIELD: &str = "insert_time";
pub const UPDATE_USER_FIELD: &str = "update_user";
pub const UPDATE_TIME_FIELD: &str = "update_time";

static NULL: Value = Value::Null;

/// What setting a value does besides storing it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetOptions {
    /// Run the schema's `resolve` hook.
    pub resolve: bool,
    pub validate: bool,
    /// Replace empty values with the field default.
    pub default_on_empty: bool,
    pub convert: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            resolve: true,
            validate: true,
            default_on_empty: true,
            convert: true,
        }
    }
}

impl SetOptions {
    /// Defaults without validation, used when loading stored rows.
    pub fn quiet() -> Self {
        Self {
            validate: false,
            ..Self::default()
        }
    }
}

/// A validator slot, by owner and position.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum SlotKey {
    Field(String, usize),
    Row(usize),
}

#[derive(Clone, Debug)]
pub struct Entity {
    schema: Arc<EntitySchema>,
    repository: Option<EntityRepository>,
    data: Row,
    stored_data: Option<Row>,
    stored_identity: Row,
    current_user: Option<String>,
    sanitize: bool,
    disabled: HashSet<SlotKey>,
    conversion_errors: IndexMap<String, String>,
}

impl Entity {
    /// A detached entity; reads and writes need [`Entity::with_repository`].
    pub fn new(schema: Arc<EntitySchema>) -> Self {
        Self {
            schema,
            repository: None,
            data: Row::new(),
            stored_data: None,
            stored_identity: Row::new(),
            current_user: None,
            sanitize: true,
            disabled: HashSet::new(),
            conversion_errors: IndexMap::new(),
        }
    }

    pub fn with_repository(repository: EntityRepository) -> Self {
        let mut entity = Self::new(Arc::clone(repository.schema()));
        entity.repository = Some(repository);
        entity
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    pub fn repository(&self) -> Option<&EntityRepository> {
        self.repository.as_ref()
    }

    pub fn set_repository(&mut self, repository: EntityRepository) -> &mut Self {
        self.repository = Some(repository);
        self
    }

    fn require_repository(&self) -> EntityResult<EntityRepository> {
        self.repository.clone().ok_or(EntityError::NoRepository)
    }

    pub fn set_current_user(&mut self, user: impl Into<String>) -> &mut Self {
        self.current_user = Some(user.into());
        self
    }

    /// Toggle HTML sanitizing of string values on write.
    pub fn set_sanitize(&mut self, sanitize: bool) -> &mut Self {
        self.sanitize = sanitize;
        self
    }

    // ---- field metadata ----

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.schema.field(name)
    }

    pub fn field_config(&self, name: &str) -> EntityResult<FieldConfig> {
        self.schema
            .field(name)
            .map(Field::to_config)
            .ok_or_else(|| EntityError::UnknownField(name.to_string()))
    }

    pub fn field_config_by_column(&self, column: &str) -> EntityResult<FieldConfig> {
        self.schema
            .field_by_column(column)
            .map(Field::to_config)
            .ok_or_else(|| EntityError::UnknownColumn(column.to_string()))
    }

    pub fn fields_config(&self) -> Vec<FieldConfig> {
        self.schema.fields().map(Field::to_config).collect()
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.schema.field_names().collect()
    }

    /// Names of the fields that accept input: everything but generated ids.
    pub fn edit_fields(&self) -> Vec<&str> {
        self.schema
            .fields()
            .filter(|f| !f.is_generated())
            .map(Field::name)
            .collect()
    }

    /// Names of the persisted fields.
    pub fn db_fields(&self) -> Vec<&str> {
        self.schema.db_fields().map(Field::name).collect()
    }

    pub fn column_types(&self) -> Vec<&str> {
        self.schema.fields().map(Field::column_type).collect()
    }

    pub fn identity(&self) -> Vec<&str> {
        self.schema.identity(false)
    }

    pub fn identity_column_names(&self) -> Vec<&str> {
        self.schema.identity_column_names(false)
    }

    pub fn identity_sequence_name(&self) -> String {
        self.schema.identity_sequence_name()
    }

    /// Identity values as exposed to callers (unconverted).
    pub fn identity_data(&self) -> Row {
        self.identity()
            .into_iter()
            .map(|id| (id.to_string(), self.get(id)))
            .collect()
    }

    /// Identity values as stored, for lookups.
    fn identity_values(&self, data: &Row) -> Row {
        self.identity()
            .into_iter()
            .map(|id| (id.to_string(), data.get(id).cloned().unwrap_or_default()))
            .collect()
    }

    pub fn stored_identity_data(&self) -> &Row {
        &self.stored_identity
    }

    /// True when the entity does not map to a stored row yet.
    pub fn is_empty_stored_identity_data(&self) -> bool {
        self.stored_identity.values().all(Value::is_blank)
    }

    /// The data of the first `set_data` call.
    pub fn stored_data(&self) -> Option<&Row> {
        self.stored_data.as_ref()
    }

    // ---- values ----

    pub fn get_raw(&self, name: &str) -> &Value {
        self.data.get(name).unwrap_or(&NULL)
    }

    /// The unconverted value.
    pub fn get(&self, name: &str) -> Value {
        self.get_with(name, true, false)
    }

    pub fn get_with(&self, name: &str, unconvert: bool, default_on_empty: bool) -> Value {
        let field = self.schema.field_or_undeclared(name);
        let mut value = self.get_raw(name).clone();
        if default_on_empty && field.is_empty(&value) {
            value = field.default_value().clone();
        }
        if unconvert && !(value.is_null() && field.is_id()) {
            value = field.unconvert(&value);
        }
        value
    }

    pub fn raw_data(&self) -> &Row {
        &self.data
    }

    /// Replace the values as they are, skipping conversion and hooks.
    pub fn set_raw_data(&mut self, data: Row) -> &mut Self {
        self.data = data;
        self
    }

    /// Values by field name.
    ///
    /// With `persist_only` only persisted fields are returned: those holding
    /// a value, plus not nullable ones filled with their default.
    pub fn data(&self, persist_only: bool, unconvert: bool, default_on_empty: bool) -> Row {
        if !persist_only {
            return self
                .data
                .keys()
                .map(|name| (name.clone(), self.get_with(name, unconvert, default_on_empty)))
                .collect();
        }
        self.schema
            .db_fields()
            .filter_map(|field| {
                let name = field.name();
                if self.data.contains_key(name) {
                    Some((name.to_string(), self.get_with(name, unconvert, default_on_empty)))
                } else if !field.is_nullable() {
                    Some((name.to_string(), self.get_with(name, unconvert, true)))
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn to_value(&self) -> JsonValue {
        row_to_json(&self.data(false, true, false))
    }

    pub fn is_empty(&self, name: &str) -> bool {
        self.schema.field_or_undeclared(name).is_empty(&self.get(name))
    }

    pub fn not_empty(&self, name: &str) -> bool {
        !self.is_empty(name)
    }

    fn store_value(&mut self, name: &str, value: Value, opts: SetOptions) {
        let schema = Arc::clone(&self.schema);
        let field = schema.field_or_undeclared(name);
        let mut value = schema.hooks().before_set_value(self, name, value);

        if !field.is_id()
            && ((value.is_null() && !field.is_nullable())
                || (opts.default_on_empty && field.is_empty(&value)))
        {
            value = field.default_value().clone();
        }

        self.conversion_errors.shift_remove(name);
        if opts.convert && !(value.is_null() && field.is_id()) {
            match field.convert(&value) {
                Ok(converted) => value = converted,
                Err(e) => {
                    debug!(entity = schema.name(), field = name, error = %e, "conversion failed");
                    self.conversion_errors.insert(name.to_string(), e.to_string());
                }
            }
        }
        self.data.insert(name.to_string(), value);
    }

    fn finish_set(&mut self, name: &str, opts: SetOptions) {
        let hooks = Arc::clone(self.schema.hooks());
        if opts.resolve {
            hooks.resolve(self, name);
        }
        hooks.after_set_value(self, name);
    }

    /// Set a value without validating it. Hooks may call this freely.
    pub fn assign(&mut self, name: &str, value: impl Into<Value>, opts: SetOptions) -> &mut Self {
        self.store_value(name, value.into(), opts);
        self.finish_set(name, opts);
        self
    }

    /// Set a value and, unless disabled, validate the field.
    pub async fn set(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        opts: SetOptions,
    ) -> EntityResult<ValidationErrors> {
        self.store_value(name, value.into(), opts);
        let errors = if opts.validate {
            self.validate(Some(name)).await?
        } else {
            ValidationErrors::default()
        };
        self.finish_set(name, opts);
        Ok(errors)
    }

    /// Set many values, declared fields first in declaration order.
    ///
    /// The first call also records `data` as the stored data. When `data`
    /// carries any identity field the stored identity is taken from it.
    pub async fn set_data(&mut self, mut data: Row, opts: SetOptions) -> EntityResult<ValidationErrors> {
        if self.stored_data.is_none() {
            self.stored_data = Some(data.clone());
        }
        let identity: Vec<String> = self.identity().into_iter().map(str::to_string).collect();
        let has_identity = identity.iter().any(|id| data.contains_key(id));

        let mut ordered = Row::with_capacity(data.len());
        for name in self.schema.field_names() {
            if let Some(value) = data.shift_remove(name) {
                ordered.insert(name.to_string(), value);
            }
        }
        ordered.extend(data);

        let present: Vec<String> = ordered.keys().cloned().collect();
        let mut errors = ValidationErrors::default();
        for (name, value) in ordered {
            errors.extend(self.set(&name, value, opts).await?);
        }

        if has_identity {
            self.stored_identity = identity
                .into_iter()
                .map(|id| {
                    let value = if present.contains(&id) {
                        self.get_raw(&id).clone()
                    } else {
                        Value::Null
                    };
                    (id, value)
                })
                .collect();
        }
        Ok(errors)
    }

    /// Put one field (or all of them) back to the default.
    pub fn reset(&mut self, name: Option<&str>) -> &mut Self {
        let opts = SetOptions::quiet();
        match name {
            Some(name) => {
                let value = self.schema.field_or_undeclared(name).default_value().clone();
                self.assign(name, value, opts);
            }
            None => {
                let defaults: Vec<(String, Value)> = self
                    .schema
                    .fields()
                    .map(|f| (f.name().to_string(), f.default_value().clone()))
                    .collect();
                for (name, value) in defaults {
                    self.assign(&name, value, opts);
                }
            }
        }
        self
    }

    // ---- keys ----

    /// Values of each unique key group.
    pub fn unique_key_filter_data(&self) -> Vec<Row> {
        self.schema
            .unique_keys()
            .iter()
            .map(|group| {
                group
                    .field_names()
                    .into_iter()
                    .map(|name| (name.to_string(), self.get(name)))
                    .collect()
            })
            .collect()
    }

    /// One equals filter per unique key group.
    pub fn unique_key_filters(&self) -> EntityResult<Vec<Filter>> {
        self.unique_key_filter_data()
            .iter()
            .map(|row| {
                Filter::from_value(&row_to_json(row), Operator::Equals).map_err(EntityError::from)
            })
            .collect()
    }

    /// Whether a stored row has this identity.
    pub async fn exists(&self, identity: &Row) -> EntityResult<bool> {
        if identity.is_empty() {
            return Err(EntityError::EmptyIdentity);
        }
        let repository = self.repository.as_ref().ok_or(EntityError::NoRepository)?;
        Ok(repository.read_one_by_key(identity).await?.is_some())
    }

    /// Reload the values of the stored row.
    pub async fn refresh(&mut self) -> EntityResult<()> {
        let repository = self.require_repository()?;
        let identity = self.identity_values(&self.data);
        if identity.is_empty() {
            return Err(EntityError::EmptyIdentity);
        }
        let row = repository
            .read_one_by_key(&identity)
            .await?
            .ok_or(EntityError::RefreshFailed)?;
        self.set_data(row, SetOptions::quiet()).await?;
        Ok(())
    }

    // ---- validation ----

    /// Run the validators of one field, or of every field followed by the
    /// row validators.
    ///
    /// Row validators only run once the fields are valid. When a slot fails,
    /// the row validators of its `next` chain are skipped until the next row
    /// pass.
    pub async fn validate(&mut self, field: Option<&str>) -> EntityResult<ValidationErrors> {
        let schema = Arc::clone(&self.schema);
        let mut errors = ValidationErrors::default();

        let fields: Vec<&Field> = match field {
            Some(name) => schema.field(name).into_iter().collect(),
            None => schema.fields().collect(),
        };
        for f in &fields {
            if let Some(message) = self.conversion_errors.get(f.name()) {
                errors.push(Some(f.name()), message.clone());
            }
        }

        for f in &fields {
            for (index, slot) in f.validators().iter().enumerate() {
                let key = SlotKey::Field(f.name().to_string(), index);
                if !slot.is_enabled() || self.disabled.contains(&key) {
                    continue;
                }
                self.disabled.insert(key);
                let found = match slot.validator().validate(self, Some(f.name())).await {
                    Ok(found) => found,
                    Err(e) => {
                        self.release_running_slots();
                        return Err(e);
                    }
                };
                if !found.is_empty() {
                    self.disable_chain(slot.next());
                }
                for error in found {
                    let error = match error.field {
                        Some(_) => error,
                        None => ValidationError::for_field(f.name(), error.message),
                    };
                    errors.push_error(error);
                }
            }
            for index in 0..f.validators().len() {
                self.disabled.remove(&SlotKey::Field(f.name().to_string(), index));
            }
        }

        if !errors.is_empty() {
            return Ok(errors);
        }

        for (index, slot) in schema.row_validators().iter().enumerate() {
            let key = SlotKey::Row(index);
            if !slot.is_enabled() || self.disabled.contains(&key) {
                continue;
            }
            if let Some(name) = field {
                if !slot.validator().has_field(name) {
                    continue;
                }
            }
            self.disabled.insert(key);
            let found = match slot.validator().validate(self, field).await {
                Ok(found) => found,
                Err(e) => {
                    self.release_running_slots();
                    self.disabled.retain(|key| !matches!(key, SlotKey::Row(_)));
                    return Err(e);
                }
            };
            if !found.is_empty() {
                debug!(entity = schema.name(), validator = slot.name(), "row validation failed");
                self.disable_chain(slot.next());
            }
            for error in found {
                errors.push_error(error);
            }
        }
        self.disabled.retain(|key| !matches!(key, SlotKey::Row(_)));

        Ok(errors)
    }

    /// Field slots are only marked while their field is being checked.
    fn release_running_slots(&mut self) {
        self.disabled.retain(|key| !matches!(key, SlotKey::Field(..)));
    }

    fn disable_chain(&mut self, next: Option<&str>) {
        let mut visited = HashSet::new();
        let mut next = next.map(str::to_string);
        while let Some(name) = next {
            if !visited.insert(name.clone()) {
                break;
            }
            let Some(index) = self.schema.row_validator_index(&name) else {
                break;
            };
            self.disabled.insert(SlotKey::Row(index));
            next = self.schema.row_validators()[index].next().map(str::to_string);
        }
    }

    pub async fn is_valid(&mut self) -> EntityResult<bool> {
        Ok(self.validate(None).await?.is_empty())
    }

    pub async fn validate_delete(&self) -> EntityResult<ValidationErrors> {
        let hooks = Arc::clone(self.schema.hooks());
        hooks.validate_delete(self).await
    }

    pub async fn is_delete_valid(&self) -> EntityResult<bool> {
        Ok(self.validate_delete().await?.is_empty())
    }

    // ---- writes ----

    /// Audit values applied on insert to the fields the schema declares.
    pub fn insert_default_values(&self) -> Row {
        Row::from([
            (INSERT_USER_FIELD.to_string(), Value::from(self.current_user.clone())),
            (INSERT_TIME_FIELD.to_string(), Value::DateTime(now())),
        ])
    }

    pub fn update_default_values(&self) -> Row {
        Row::from([
            (UPDATE_USER_FIELD.to_string(), Value::from(self.current_user.clone())),
            (UPDATE_TIME_FIELD.to_string(), Value::DateTime(now())),
        ])
    }

    fn apply_default_values(&mut self, values: Row) {
        for (name, value) in values {
            if self.schema.field(&name).is_some() {
                self.assign(&name, value, SetOptions::quiet());
            }
        }
    }

    /// HTML-clean the string values of sanitized fields.
    pub fn sanitize_row(&self, row: &Row) -> Row {
        row.iter()
            .map(|(name, value)| {
                let sanitize = self.schema.field(name).map_or(true, Field::sanitize);
                let value = match value {
                    Value::String(s) if sanitize => Value::String(ammonia::clean(s)),
                    other => other.clone(),
                };
                (name.clone(), value)
            })
            .collect()
    }

    fn prepare_write(&self, mut data: Row) -> Row {
        for id in self.schema.identity(true) {
            data.shift_remove(id);
        }
        if self.sanitize {
            data = self.sanitize_row(&data);
        }
        data
    }

    /// Insert when the entity has no stored identity, update otherwise.
    pub async fn save(&mut self) -> Outcome {
        let hooks = Arc::clone(self.schema.hooks());
        if let Err(e) = hooks.before_save(self).await {
            return Outcome::error("_save", e.to_string(), self.to_value());
        }
        let mut outcome = if self.is_empty_stored_identity_data() {
            self.insert().await
        } else {
            self.update(true).await
        };
        if let Err(e) = hooks.after_save(self).await {
            outcome.add_error("_save", e.to_string());
        }
        outcome
    }

    pub async fn insert(&mut self) -> Outcome {
        match self.validate(None).await {
            Ok(errors) if !errors.is_empty() => return Outcome::failed(errors, self.to_value()),
            Ok(_) => {}
            Err(e) => return Outcome::error("_insert", e.to_string(), self.to_value()),
        }
        match self.insert_row().await {
            Ok(()) => Outcome::ok(self.to_value()),
            Err(e) => {
                warn!(entity = self.schema.name(), error = %e, "insert failed");
                Outcome::error("_insert", e.to_string(), self.to_value())
            }
        }
    }

    async fn insert_row(&mut self) -> EntityResult<()> {
        let repository = self.require_repository()?;
        let schema = Arc::clone(&self.schema);
        let hooks = Arc::clone(schema.hooks());
        hooks.before_insert(self).await?;

        self.apply_default_values(self.insert_default_values());
        let data = self.data(true, false, false);
        let identity = self.identity_values(&data);
        if !identity.is_empty()
            && !identity.values().all(Value::is_null)
            && self.exists(&identity).await?
        {
            return Err(EntityError::AlreadyStored);
        }

        let generated = repository.insert_row(&self.prepare_write(data)).await?;
        if let (Some(id), Some(name)) = (generated, schema.identity(true).first()) {
            self.assign(name, Value::Int(id), SetOptions::quiet());
        }
        self.stored_identity = self.identity_values(&self.data);
        if !self.stored_identity.is_empty() {
            self.refresh().await?;
        }

        hooks.after_insert(self).await?;
        Ok(())
    }

    /// Update the stored row, optionally reloading it afterwards.
    pub async fn update(&mut self, refresh: bool) -> Outcome {
        match self.validate(None).await {
            Ok(errors) if !errors.is_empty() => return Outcome::failed(errors, self.to_value()),
            Ok(_) => {}
            Err(e) => return Outcome::error("_update", e.to_string(), self.to_value()),
        }
        match self.update_row(refresh).await {
            Ok(()) => Outcome::ok(self.to_value()),
            Err(e) => {
                warn!(entity = self.schema.name(), error = %e, "update failed");
                Outcome::error("_update", e.to_string(), self.to_value())
            }
        }
    }

    async fn update_row(&mut self, refresh: bool) -> EntityResult<()> {
        let repository = self.require_repository()?;
        let hooks = Arc::clone(self.schema.hooks());
        hooks.before_update(self).await?;

        let stored = self.stored_identity.clone();
        if !self.exists(&stored).await? {
            return Err(EntityError::NotFound);
        }

        self.apply_default_values(self.update_default_values());
        let data = self.data(true, false, false);
        let identity = self.identity_values(&data);
        if identity != stored && self.exists(&identity).await? {
            return Err(EntityError::IdentityTaken);
        }

        repository
            .update_rows(&self.prepare_write(data), &stored)
            .await?;
        self.stored_identity = identity;
        if refresh {
            self.refresh().await?;
        }

        hooks.after_update(self).await?;
        Ok(())
    }

    /// Delete the stored row, running the delete checks first when asked.
    pub async fn delete(&mut self, validate: bool) -> Outcome {
        if validate {
            match self.validate_delete().await {
                Ok(errors) if !errors.is_empty() => {
                    return Outcome::failed(errors, self.to_value())
                }
                Ok(_) => {}
                Err(e) => return Outcome::error("_delete", e.to_string(), self.to_value()),
            }
        }
        match self.delete_row().await {
            Ok(()) => Outcome::ok(self.to_value()),
            Err(e) => {
                warn!(entity = self.schema.name(), error = %e, "delete failed");
                Outcome::error("_delete", e.to_string(), self.to_value())
            }
        }
    }

    async fn delete_row(&mut self) -> EntityResult<()> {
        let repository = self.require_repository()?;
        let hooks = Arc::clone(self.schema.hooks());
        hooks.before_delete(self).await?;

        if repository.delete_rows(&self.stored_identity).await? == 0 {
            return Err(EntityError::NothingToDelete);
        }

        hooks.after_delete(self).await?;
        Ok(())
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", row_to_json(&self.data))
    }
}

fn now() -> chrono::NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use crate::hooks::EntityHooks;
    use crate::validator::{FnValidator, ValidatorSlot};
    use serde_json::json;

    fn schema() -> Arc<EntitySchema> {
        EntitySchema::builder("customer", "customers")
            .field(FieldConfig::new("id", FieldType::Integer).id().generated())
            .field(FieldConfig::new("name", FieldType::String).required())
            .field(FieldConfig::new("age", FieldType::Integer).not_null())
            .field(FieldConfig::new("born", FieldType::Date))
            .field(FieldConfig::new("code", FieldType::String).with_default(json!("X")))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_converts_values() {
        let mut e = Entity::new(schema());
        e.set("age", "42", SetOptions::default()).await.unwrap();
        assert_eq!(e.get_raw("age"), &Value::Int(42));
        e.set("born", "2020-01-31", SetOptions::default()).await.unwrap();
        assert!(matches!(e.get_raw("born"), Value::Date(_)));
        assert_eq!(e.get("born"), Value::from("2020-01-31"));
    }

    #[tokio::test]
    async fn test_defaults_on_empty_values() {
        let mut e = Entity::new(schema());
        e.set("code", "", SetOptions::default()).await.unwrap();
        assert_eq!(e.get_raw("code"), &Value::from("X"));
        e.set("age", Value::Null, SetOptions::default()).await.unwrap();
        assert_eq!(e.get_raw("age"), &Value::Int(0));
        e.set("id", Value::Null, SetOptions::default()).await.unwrap();
        assert_eq!(e.get_raw("id"), &Value::Null);
    }

    #[tokio::test]
    async fn test_required_field_reports_error() {
        let mut e = Entity::new(schema());
        let errors = e.set("name", "", SetOptions::default()).await.unwrap();
        assert_eq!(errors.get("name").map(<[String]>::len), Some(1));
        let errors = e.set("name", "Ada", SetOptions::default()).await.unwrap();
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_conversion_error_is_a_field_error() {
        let mut e = Entity::new(schema());
        let errors = e.set("born", "31 jan", SetOptions::default()).await.unwrap();
        assert!(errors.get("born").is_some());
        assert_eq!(e.get_raw("born"), &Value::from("31 jan"));
    }

    #[tokio::test]
    async fn test_set_data_orders_fields_and_keeps_stored_identity() {
        let mut e = Entity::new(schema());
        let row = Row::from([
            ("extra".to_string(), Value::from("x")),
            ("name".to_string(), Value::from("Ada")),
            ("id".to_string(), Value::Int(7)),
        ]);
        e.set_data(row, SetOptions::quiet()).await.unwrap();
        let keys: Vec<&str> = e.raw_data().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["id", "name", "extra"]);
        assert_eq!(e.stored_identity_data().get("id"), Some(&Value::Int(7)));
        assert!(!e.is_empty_stored_identity_data());
        assert_eq!(e.stored_data().map(Row::len), Some(3));
    }

    #[tokio::test]
    async fn test_persisted_data_fills_not_nullable_fields() {
        let mut e = Entity::new(schema());
        e.set("name", "Ada", SetOptions::quiet()).await.unwrap();
        let data = e.data(true, false, false);
        assert_eq!(data.get("name"), Some(&Value::from("Ada")));
        assert_eq!(data.get("age"), Some(&Value::Int(0)));
        assert!(!data.contains_key("born"));
    }

    #[tokio::test]
    async fn test_next_chain_skips_row_validators() {
        let fail = FnValidator::new(|_: &Entity, _: Option<&str>| vec![ValidationError::new("first")]);
        let never = FnValidator::new(|_: &Entity, _: Option<&str>| vec![ValidationError::new("second")]);
        let schema = EntitySchema::builder("t", "t")
            .field(FieldConfig::new("a", FieldType::String))
            .row_validator(ValidatorSlot::new("first", Arc::new(fail)).with_next("second"))
            .row_validator(ValidatorSlot::new("second", Arc::new(never)))
            .build()
            .unwrap();
        let mut e = Entity::new(schema);
        let errors = e.validate(None).await.unwrap();
        assert_eq!(errors.row_errors(), ["first".to_string()]);
        // Chained slots are enabled again for the next pass.
        let errors = e.validate(None).await.unwrap();
        assert_eq!(errors.row_errors(), ["first".to_string()]);
    }

    struct FlakyCheck {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl crate::validator::Validator for FlakyCheck {
        async fn validate(
            &self,
            _entity: &Entity,
            _field: Option<&str>,
        ) -> EntityResult<Vec<ValidationError>> {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 0 {
                Err(EntityError::Hook("connection reset".into()))
            } else {
                Ok(vec![ValidationError::new("taken")])
            }
        }
    }

    #[tokio::test]
    async fn test_failed_validator_runs_again_on_next_pass() {
        let field_check = Arc::new(FlakyCheck {
            calls: Default::default(),
        });
        let row_check = Arc::new(FlakyCheck {
            calls: Default::default(),
        });
        let field = Field::new(FieldConfig::new("a", FieldType::String))
            .unwrap()
            .with_validator(ValidatorSlot::new("a_check", field_check.clone()));
        let schema = EntitySchema::builder("t", "t")
            .built_field(field)
            .build()
            .unwrap();
        let mut e = Entity::new(schema);
        assert!(e.validate(None).await.is_err());
        let errors = e.validate(None).await.unwrap();
        assert_eq!(errors.get("a"), Some(&["taken".to_string()][..]));
        assert_eq!(field_check.calls.load(std::sync::atomic::Ordering::SeqCst), 2);

        let schema = EntitySchema::builder("t", "t")
            .field(FieldConfig::new("a", FieldType::String))
            .row_validator(ValidatorSlot::new("row_check", row_check.clone()))
            .build()
            .unwrap();
        let mut e = Entity::new(schema);
        assert!(e.validate(None).await.is_err());
        let errors = e.validate(None).await.unwrap();
        assert_eq!(errors.row_errors(), ["taken".to_string()]);
        assert_eq!(row_check.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_writes_without_repository_fail() {
        let mut e = Entity::new(schema());
        e.set("name", "Ada", SetOptions::quiet()).await.unwrap();
        let out = e.insert().await;
        assert!(!out.is_success());
        assert_eq!(
            out.errors.get("_insert"),
            Some(&vec![EntityError::NoRepository.to_string()])
        );
    }

    struct Upper;

    impl EntityHooks for Upper {
        fn before_set_value(&self, _entity: &Entity, field: &str, value: Value) -> Value {
            match (field, value) {
                ("name", Value::String(s)) => Value::String(s.to_uppercase()),
                (_, v) => v,
            }
        }

        fn resolve(&self, entity: &mut Entity, field: &str) {
            if field == "name" {
                let initial = entity.get("name").as_text().chars().next().map(String::from);
                entity.assign("code", Value::from(initial), SetOptions::quiet());
            }
        }
    }

    #[tokio::test]
    async fn test_hooks_rewrite_and_resolve() {
        let schema = EntitySchema::builder("t", "t")
            .field(FieldConfig::new("name", FieldType::String))
            .field(FieldConfig::new("code", FieldType::String))
            .hooks(Arc::new(Upper))
            .build()
            .unwrap();
        let mut e = Entity::new(schema);
        e.set("name", "ada", SetOptions::default()).await.unwrap();
        assert_eq!(e.get("name"), Value::from("ADA"));
        assert_eq!(e.get("code"), Value::from("A"));
        assert_eq!(e.to_string(), r#"{"name":"ADA","code":"A"}"#);
    }

    #[test]
    fn test_sanitize_row() {
        let e = Entity::new(schema());
        let row = Row::from([("name".to_string(), Value::from("<script>x</script>Ada"))]);
        assert_eq!(e.sanitize_row(&row).get("name"), Some(&Value::from("Ada")));
    }
}
