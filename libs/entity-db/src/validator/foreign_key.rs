use async_trait::async_trait;
use filter_core::Operator;
use serde::{Deserialize, Serialize};

use super::{replace_error_message, ValidationError, Validator};
use crate::entity::Entity;
use crate::error::{EntityError, EntityResult};
use crate::repository::EntityRepository;
use crate::value::Value;

const DEFAULT_MESSAGE: &str = "Foreign key %s not found";

/// Maps a local field onto a column of the referenced entity.
///
/// `onlyParam` fields narrow the lookup but are neither checked for
/// emptiness nor reported.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyField {
    pub name: String,
    pub fk_name: String,
    #[serde(default)]
    pub op: Operator,
    #[serde(default)]
    pub only_param: bool,
    #[serde(default)]
    pub ignore_empty: bool,
}

impl ForeignKeyField {
    pub fn new(name: impl Into<String>, fk_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fk_name: fk_name.into(),
            op: Operator::Equals,
            only_param: false,
            ignore_empty: false,
        }
    }

    pub fn only_param(mut self) -> Self {
        self.only_param = true;
        self
    }

    pub fn ignore_empty(mut self) -> Self {
        self.ignore_empty = true;
        self
    }
}

/// Checks that the referenced row exists in another entity's repository.
#[derive(Clone)]
pub struct ForeignKeyValidator {
    fields: Vec<ForeignKeyField>,
    repository: EntityRepository,
    message: String,
}

impl ForeignKeyValidator {
    pub fn new(fields: Vec<ForeignKeyField>, repository: EntityRepository) -> Self {
        Self {
            fields,
            repository,
            message: DEFAULT_MESSAGE.to_string(),
        }
    }

    /// `%s` is replaced by the labels of the checked fields.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn fields(&self) -> &[ForeignKeyField] {
        &self.fields
    }

    pub fn repository(&self) -> &EntityRepository {
        &self.repository
    }

    fn is_key_empty(&self, entity: &Entity) -> EntityResult<bool> {
        for fk in self.fields.iter().filter(|f| !f.only_param) {
            if entity.field(&fk.name).is_none() {
                return Err(EntityError::UnknownField(fk.name.clone()));
            }
            if entity.not_empty(&fk.name) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn labels(&self, entity: &Entity) -> String {
        self.fields
            .iter()
            .filter(|f| !f.only_param)
            .map(|f| {
                entity
                    .field(&f.name)
                    .map(|field| field.label().to_string())
                    .unwrap_or_else(|| f.name.clone())
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[async_trait]
impl Validator for ForeignKeyValidator {
    async fn validate(
        &self,
        entity: &Entity,
        _field: Option<&str>,
    ) -> EntityResult<Vec<ValidationError>> {
        if self.is_key_empty(entity)? {
            return Ok(Vec::new());
        }

        let mut filter = self.repository.filter_instance();
        for fk in &self.fields {
            if fk.ignore_empty && !entity.not_empty(&fk.name) {
                continue;
            }
            match entity.get_raw(&fk.name) {
                Value::Null => filter.add_rule(&fk.fk_name, Some(Operator::IsNull), None)?,
                value => filter.add_rule(&fk.fk_name, Some(fk.op), Some(value.to_json()))?,
            };
        }

        if self.repository.read_one_by(&filter).await?.is_some() {
            return Ok(Vec::new());
        }

        let message = self.message.replace("%s", &self.labels(entity));
        let message = replace_error_message(&message, &entity.data(false, true, false));
        Ok(self
            .fields
            .iter()
            .filter(|f| !f.only_param && (!f.ignore_empty || entity.not_empty(&f.name)))
            .map(|f| ValidationError::for_field(f.name.clone(), message.clone()))
            .collect())
    }

    fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.name == field && !f.only_param)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_defaults() {
        let f: ForeignKeyField =
            serde_json::from_value(json!({"name": "customer_id", "fkName": "id"})).unwrap();
        assert_eq!(f, ForeignKeyField::new("customer_id", "id"));
        let f: ForeignKeyField = serde_json::from_value(
            json!({"name": "c", "fkName": "code", "op": "beginsWith", "onlyParam": true}),
        )
        .unwrap();
        assert_eq!(f.op, Operator::BeginsWith);
        assert!(f.only_param);
    }
}
