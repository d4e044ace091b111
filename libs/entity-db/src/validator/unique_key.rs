use async_trait::async_trait;
use filter_core::Operator;
use serde::{Deserialize, Deserializer, Serialize};

use super::{replace_error_message, ValidationError, Validator};
use crate::entity::Entity;
use crate::error::{EntityError, EntityResult};

/// A field taking part in a unique key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniqueKeyField {
    pub name: String,
    #[serde(default)]
    pub ignore_empty: bool,
}

impl UniqueKeyField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ignore_empty: false,
        }
    }
}

/// Fields that must be unique together, with an optional custom message.
///
/// Deserializes from `{"fields": [...], "message": ".."}` or from the bare
/// list of fields; fields may be plain names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UniqueKeyGroup {
    pub fields: Vec<UniqueKeyField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl UniqueKeyGroup {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(UniqueKeyField::new).collect(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KeyFieldRepr {
    Name(String),
    Full(UniqueKeyField),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GroupRepr {
    Full {
        fields: Vec<KeyFieldRepr>,
        #[serde(default)]
        message: Option<String>,
    },
    List(Vec<KeyFieldRepr>),
}

impl<'de> Deserialize<'de> for UniqueKeyGroup {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (fields, message) = match GroupRepr::deserialize(deserializer)? {
            GroupRepr::Full { fields, message } => (fields, message),
            GroupRepr::List(fields) => (fields, None),
        };
        let fields = fields
            .into_iter()
            .map(|f| match f {
                KeyFieldRepr::Name(name) => UniqueKeyField::new(name),
                KeyFieldRepr::Full(field) => field,
            })
            .collect();
        Ok(Self { fields, message })
    }
}

/// Refuses a row when another stored row has the same values on any
/// unique key group.
#[derive(Clone, Debug)]
pub struct UniqueKeyValidator {
    groups: Vec<UniqueKeyGroup>,
}

impl UniqueKeyValidator {
    pub fn new(groups: Vec<UniqueKeyGroup>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[UniqueKeyGroup] {
        &self.groups
    }

    fn is_key_empty(&self, entity: &Entity) -> EntityResult<bool> {
        for key in self.groups.iter().flat_map(|g| &g.fields) {
            if entity.field(&key.name).is_none() {
                return Err(EntityError::UnknownField(key.name.clone()));
            }
            if entity.not_empty(&key.name) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn message(&self, group: &UniqueKeyGroup, entity: &Entity) -> String {
        if let Some(message) = &group.message {
            return message.clone();
        }
        let mut message = String::from("Duplicate key: ");
        for key in &group.fields {
            let label = entity
                .field(&key.name)
                .map(|f| f.label())
                .unwrap_or(key.name.as_str());
            message.push_str(&format!("{label} = {{{{ {} }}}} ", key.name));
        }
        message
    }
}

#[async_trait]
impl Validator for UniqueKeyValidator {
    async fn validate(
        &self,
        entity: &Entity,
        _field: Option<&str>,
    ) -> EntityResult<Vec<ValidationError>> {
        if self.is_key_empty(entity)? {
            return Ok(Vec::new());
        }
        let repository = entity.repository().ok_or(EntityError::NoRepository)?;
        let is_new = entity.is_empty_stored_identity_data();
        let data = entity.data(false, true, false);

        let mut errors = Vec::new();
        for group in &self.groups {
            let mut filter = repository.filter_instance();
            // Editing must not collide with the stored row itself.
            if !is_new {
                for (id, value) in entity.stored_identity_data() {
                    filter.add_rule(id, Some(Operator::Not), Some(value.to_json()))?;
                }
            }
            for key in &group.fields {
                if !key.ignore_empty || entity.not_empty(&key.name) {
                    filter.add_rule_equals(&key.name, entity.get_raw(&key.name).to_json())?;
                }
            }
            if repository.read_one_by(&filter).await?.is_some() {
                let message = replace_error_message(&self.message(group, entity), &data);
                errors.push(ValidationError::new(message));
            }
        }
        Ok(errors)
    }

    fn has_field(&self, field: &str) -> bool {
        self.groups
            .iter()
            .flat_map(|g| &g.fields)
            .any(|f| f.name == field)
    }
}
