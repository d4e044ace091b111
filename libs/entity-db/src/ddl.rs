//! Table and unique index creation from an entity schema.

use sea_orm::sea_query::{Alias, ColumnDef, Index, IntoTableRef, SimpleExpr, Table};
use sea_orm::{ConnectionTrait, DbBackend, Statement};
use sha1::{Digest, Sha1};
use tracing::{info, warn};

use crate::bind::to_sea;
use crate::error::EntityResult;
use crate::field::{Field, FieldType};
use crate::outcome::Outcome;
use crate::repository::EntityRepository;

/// `<table>_uk_<first 6 hex chars of sha1(<table>_uk_<field names>)>`.
pub fn unique_index_name(table: &str, fields: &[&str]) -> String {
    let digest = Sha1::digest(format!("{table}_uk_{}", fields.concat()).as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{table}_uk_{}", &hex[..6])
}

impl EntityRepository {
    /// Whether the entity table exists.
    pub async fn check_db(&self) -> EntityResult<bool> {
        let schema = self.schema();
        let table = schema.table_name(false);
        let owner = schema.schema_name().map(str::to_string);
        let backend = self.db().seaorm().get_database_backend();
        let statement = match backend {
            DbBackend::Sqlite => Statement::from_sql_and_values(
                backend,
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
                [table.into()],
            ),
            DbBackend::Postgres => Statement::from_sql_and_values(
                backend,
                "SELECT table_name AS name FROM information_schema.tables \
                 WHERE table_schema = COALESCE($1, current_schema()) AND table_name = $2",
                [owner.into(), table.into()],
            ),
            DbBackend::MySql => Statement::from_sql_and_values(
                backend,
                "SELECT table_name AS name FROM information_schema.tables \
                 WHERE table_schema = COALESCE(?, DATABASE()) AND table_name = ?",
                [owner.into(), table.into()],
            ),
        };
        Ok(self.db().seaorm().query_one(statement).await?.is_some())
    }

    /// Create the table and its unique indexes. Returns `false`, creating
    /// nothing, when the table already exists.
    pub async fn init_db(&self) -> EntityResult<bool> {
        if self.check_db().await? {
            return Ok(false);
        }
        let conn = self.db().seaorm();
        let backend = conn.get_database_backend();
        let citext = backend == DbBackend::Postgres && self.enable_citext().await;

        let schema = self.schema();
        let identity: Vec<&Field> = schema.db_fields().filter(|f| f.is_id()).collect();
        let inline_key = matches!(identity.as_slice(), [id] if id.is_generated());

        let table_name = schema.table_name(false);
        let mut create = Table::create();
        match schema.schema_name() {
            Some(owner) => create.table((Alias::new(owner), Alias::new(&table_name)).into_table_ref()),
            None => create.table(Alias::new(&table_name)),
        };
        for field in schema.db_fields() {
            let mut column = column_def(field, backend, citext);
            if inline_key && field.is_id() {
                column.primary_key();
            }
            create.col(&mut column);
        }
        if !inline_key && !identity.is_empty() {
            let mut key = Index::create();
            for field in &identity {
                key.col(Alias::new(field.column_name()));
            }
            create.primary_key(&mut key);
        }

        let statement = backend.build(&create);
        info!(entity = schema.name(), sql = %statement.sql, "creating table");
        conn.execute(statement).await?;

        self.init_db_indexes().await?;
        Ok(true)
    }

    async fn enable_citext(&self) -> bool {
        let conn = self.db().seaorm();
        let statement = Statement::from_string(
            conn.get_database_backend(),
            "CREATE EXTENSION IF NOT EXISTS citext",
        );
        match conn.execute(statement).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "citext extension unavailable, strings stay case sensitive");
                false
            }
        }
    }

    async fn stored_indexes(&self) -> EntityResult<Vec<String>> {
        let schema = self.schema();
        let table = schema.table_name(false);
        let owner = schema.schema_name().map(str::to_string);
        let conn = self.db().seaorm();
        let backend = conn.get_database_backend();
        let statement = match backend {
            DbBackend::Sqlite => Statement::from_sql_and_values(
                backend,
                "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ?",
                [table.into()],
            ),
            DbBackend::Postgres => Statement::from_sql_and_values(
                backend,
                "SELECT indexname AS name FROM pg_indexes \
                 WHERE schemaname = COALESCE($1, current_schema()) AND tablename = $2",
                [owner.into(), table.into()],
            ),
            DbBackend::MySql => Statement::from_sql_and_values(
                backend,
                "SELECT DISTINCT index_name AS name FROM information_schema.statistics \
                 WHERE table_schema = COALESCE(?, DATABASE()) AND table_name = ?",
                [owner.into(), table.into()],
            ),
        };
        let rows = conn.query_all(statement).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<String>("", "name").ok())
            .collect())
    }

    /// Create one unique index per unique key group. Indexes that already
    /// exist are reported as warnings; the names of created ones are the
    /// outcome data.
    pub async fn init_db_indexes(&self) -> EntityResult<Outcome> {
        let schema = self.schema();
        let table = schema.table_name(false);
        let stored = self.stored_indexes().await?;
        let conn = self.db().seaorm();
        let backend = conn.get_database_backend();

        let mut created = Vec::new();
        let mut outcome = Outcome::ok(serde_json::Value::Null);
        for group in schema.unique_keys() {
            let fields = group.field_names();
            let name = unique_index_name(&table, &fields);
            if stored.contains(&name) {
                warn!(entity = schema.name(), index = %name, "unique key already exists");
                outcome.add_warning(format!("Unique key {name} already exists"));
                continue;
            }
            let mut index = Index::create();
            index.name(&name).unique();
            match schema.schema_name() {
                Some(owner) => index.table((Alias::new(owner), Alias::new(&table)).into_table_ref()),
                None => index.table(Alias::new(&table)),
            };
            for field in &fields {
                let column = schema
                    .field(field)
                    .map_or_else(|| field.to_string(), |f| f.column_name().to_string());
                index.col(Alias::new(column));
            }
            let statement = backend.build(&index);
            info!(entity = schema.name(), sql = %statement.sql, "creating unique key");
            conn.execute(statement).await?;
            created.push(name);
        }
        outcome.set_data(serde_json::json!(created));
        Ok(outcome)
    }
}

fn column_def(field: &Field, backend: DbBackend, citext: bool) -> ColumnDef {
    let mut column = ColumnDef::new(Alias::new(field.column_name()));
    match field.field_type() {
        FieldType::String if citext => column.custom(Alias::new("citext")),
        FieldType::String => match field.length() {
            Some(len) => column.string_len(u32::try_from(len).unwrap_or(u32::MAX)),
            None => column.string(),
        },
        FieldType::Integer if field.is_generated() && backend == DbBackend::Sqlite => {
            column.integer().auto_increment()
        }
        FieldType::Integer if field.is_generated() => column.big_integer().auto_increment(),
        FieldType::Integer => column.big_integer(),
        FieldType::Numeric | FieldType::Decimal if backend == DbBackend::Sqlite => column.double(),
        FieldType::Numeric | FieldType::Decimal => {
            let cfg = field.config();
            column.decimal_len(cfg.precision, cfg.scale)
        }
        FieldType::Float => column.double(),
        FieldType::Bool => column.boolean(),
        FieldType::Date => column.date(),
        FieldType::DateTime => column.date_time(),
        FieldType::Time => column.time(),
    };

    if field.is_nullable() && !field.is_id() {
        column.null();
    } else {
        column.not_null();
    }
    let default = field.default_value();
    if !default.is_null() && !field.is_generated() {
        column.default(SimpleExpr::Value(to_sea(field.field_type(), default)));
    }
    column
}
