//! Active-record entities over SQL tables.
//!
//! An [`EntitySchema`] declares the fields, keys and validators of a table.
//! An [`EntityRepository`] reads pages of rows with filter trees from
//! `filter-core` and creates the table; an [`Entity`] converts, validates and
//! writes one row. Writes report through an [`Outcome`] instead of failing.
//!
//! Connections come from [`DbHandle`], a sea-orm connection over an sqlx pool
//! for Postgres, MySQL or SQLite.

#![cfg_attr(not(feature = "sqlite"), allow(dead_code))]

pub mod bind;
pub mod config;
pub mod db;
pub mod ddl;
pub mod entity;
pub mod error;
pub mod field;
pub mod hooks;
pub mod outcome;
pub mod params;
pub mod registry;
pub mod repository;
pub mod schema;
pub mod validator;
pub mod value;

pub use config::{DbConnConfig, PoolCfg};
pub use db::{ConnectOpts, DbEngine, DbError, DbHandle};
pub use entity::{Entity, SetOptions};
pub use error::{EntityError, EntityResult, FieldError};
pub use field::{Field, FieldConfig, FieldKind, FieldType};
pub use hooks::{EntityHooks, NoHooks};
pub use outcome::Outcome;
pub use params::{ReadPage, ReadParams, SelectParams, SortDir, Sorters};
pub use registry::EntityRegistry;
pub use repository::EntityRepository;
pub use schema::{EntitySchema, EntitySchemaBuilder, EntitySchemaConfig, ForeignKeyConfig};
pub use validator::{
    FieldNotBlankValidator, FnValidator, ForeignKeyField, ForeignKeyValidator, UniqueKeyField,
    UniqueKeyGroup, UniqueKeyValidator, ValidationError, ValidationErrors, Validator,
    ValidatorSlot,
};
pub use value::{Row, Value};

pub use filter_core::{Filter, Glue, Operator, Rule};
