use async_trait::async_trait;

use crate::entity::Entity;
use crate::error::EntityResult;
use crate::validator::ValidationErrors;
use crate::value::Value;

/// Per schema lifecycle callbacks. Every method defaults to a no-op.
///
/// The `before_*` callbacks may fail; the failure aborts the operation and is
/// reported in its outcome.
#[async_trait]
pub trait EntityHooks: Send + Sync {
    async fn before_save(&self, _entity: &mut Entity) -> EntityResult<()> {
        Ok(())
    }

    async fn after_save(&self, _entity: &mut Entity) -> EntityResult<()> {
        Ok(())
    }

    async fn before_insert(&self, _entity: &mut Entity) -> EntityResult<()> {
        Ok(())
    }

    async fn after_insert(&self, _entity: &mut Entity) -> EntityResult<()> {
        Ok(())
    }

    async fn before_update(&self, _entity: &mut Entity) -> EntityResult<()> {
        Ok(())
    }

    async fn after_update(&self, _entity: &mut Entity) -> EntityResult<()> {
        Ok(())
    }

    async fn before_delete(&self, _entity: &mut Entity) -> EntityResult<()> {
        Ok(())
    }

    async fn after_delete(&self, _entity: &mut Entity) -> EntityResult<()> {
        Ok(())
    }

    /// Extra checks run by `Entity::delete` before anything is removed.
    async fn validate_delete(&self, _entity: &Entity) -> EntityResult<ValidationErrors> {
        Ok(ValidationErrors::default())
    }

    /// Rewrite a value before it is converted and stored.
    fn before_set_value(&self, _entity: &Entity, _field: &str, value: Value) -> Value {
        value
    }

    fn after_set_value(&self, _entity: &mut Entity, _field: &str) {}

    /// Derive dependent values once `field` has been set.
    fn resolve(&self, _entity: &mut Entity, _field: &str) {}
}

/// Hooks of schemas that do not need any.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl EntityHooks for NoHooks {}
