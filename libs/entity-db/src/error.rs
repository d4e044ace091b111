use filter_core::FilterError;
use thiserror::Error;

/// Errors raised while configuring or converting a single field.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FieldError {
    #[error("Field type {0} not implemented")]
    NotImplemented(String),

    #[error("Field without a name")]
    MissingName,

    #[error("Invalid date '{value}' for field {field}, expected format {format}")]
    InvalidDate {
        field: String,
        value: String,
        format: String,
    },

    #[error("Invalid regExp for field {field}: {message}")]
    InvalidRegExp { field: String, message: String },
}

/// Errors of the entity layer.
///
/// Entity `insert` / `update` / `delete` never return these directly; they
/// fold them into an [`crate::Outcome`].
#[derive(Debug, Error)]
pub enum EntityError {
    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("Query build error: {0}")]
    Query(String),

    #[error("Field {0} not found")]
    UnknownField(String),

    #[error("Field with column name {0} not found")]
    UnknownColumn(String),

    #[error("Entity {0} not found")]
    UnknownEntity(String),

    #[error("No key data given")]
    NoKeyData,

    #[error("Empty identity data")]
    EmptyIdentity,

    #[error("No Entity Repository found!")]
    NoRepository,

    #[error("You may not insert an already stored entity")]
    AlreadyStored,

    #[error("Entity doesn't exist")]
    NotFound,

    #[error("You may not update identity key with an already existing one")]
    IdentityTaken,

    #[error("No record to delete")]
    NothingToDelete,

    #[error("Failed to refresh data, entity not found")]
    RefreshFailed,

    #[error("Invalid read parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid entity configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Hook(String),
}

impl From<sea_orm::sea_query::error::Error> for EntityError {
    fn from(e: sea_orm::sea_query::error::Error) -> Self {
        EntityError::Query(e.to_string())
    }
}

pub type EntityResult<T> = Result<T, EntityError>;
