//! Repositories of every configured entity, built in foreign key order.

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::db::DbHandle;
use crate::error::{EntityError, EntityResult};
use crate::outcome::Outcome;
use crate::repository::EntityRepository;
use crate::schema::EntitySchemaConfig;

#[derive(Clone, Debug)]
pub struct EntityRegistry {
    db: DbHandle,
    repositories: IndexMap<String, EntityRepository>,
}

impl EntityRegistry {
    pub fn new(db: DbHandle) -> Self {
        Self {
            db,
            repositories: IndexMap::new(),
        }
    }

    /// Build every entity of `configs`. Referenced entities are built first;
    /// unknown references and reference cycles are configuration errors.
    pub fn from_config(db: DbHandle, configs: &IndexMap<String, EntitySchemaConfig>) -> EntityResult<Self> {
        let mut registry = Self::new(db);
        for name in build_order(configs)? {
            let config = configs[name.as_str()].clone();
            let schema = config.build(&name, &|entity| registry.repositories.get(entity).cloned())?;
            debug!(entity = %name, table = %schema.table_name(true), "entity registered");
            registry.register(EntityRepository::new(registry.db.clone(), schema));
        }
        Ok(registry)
    }

    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    /// Add (or replace) a repository under its schema name.
    pub fn register(&mut self, repository: EntityRepository) -> &mut Self {
        self.repositories
            .insert(repository.schema().name().to_string(), repository);
        self
    }

    pub fn get(&self, name: &str) -> EntityResult<&EntityRepository> {
        self.repositories
            .get(name)
            .ok_or_else(|| EntityError::UnknownEntity(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.repositories.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EntityRepository)> {
        self.repositories.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    /// Create the missing tables, referenced entities first, then make sure
    /// every unique index exists. Outcome data lists the created tables.
    pub async fn init_all(&self) -> EntityResult<Outcome> {
        let mut outcome = Outcome::ok(serde_json::Value::Null);
        let mut created = Vec::new();
        for (name, repository) in &self.repositories {
            if repository.init_db().await? {
                info!(entity = %name, "table created");
                created.push(name.clone());
            } else {
                let indexes = repository.init_db_indexes().await?;
                for warning in indexes.warnings {
                    outcome.add_warning(warning);
                }
            }
        }
        outcome.set_data(serde_json::json!(created));
        Ok(outcome)
    }
}

/// Entity names ordered so each comes after the entities it references.
fn build_order(configs: &IndexMap<String, EntitySchemaConfig>) -> EntityResult<Vec<String>> {
    fn visit(
        name: &str,
        configs: &IndexMap<String, EntitySchemaConfig>,
        visiting: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> EntityResult<()> {
        if order.iter().any(|n| n == name) {
            return Ok(());
        }
        let config = configs
            .get(name)
            .ok_or_else(|| EntityError::UnknownEntity(name.to_string()))?;
        if !visiting.insert(name.to_string()) {
            return Err(EntityError::Config(format!(
                "foreign key cycle through entity {name}"
            )));
        }
        for dependency in config.dependencies() {
            visit(dependency, configs, visiting, order)?;
        }
        visiting.remove(name);
        order.push(name.to_string());
        Ok(())
    }

    let mut order = Vec::with_capacity(configs.len());
    let mut visiting = HashSet::new();
    for name in configs.keys() {
        visit(name, configs, &mut visiting, &mut order)?;
    }
    Ok(order)
}
