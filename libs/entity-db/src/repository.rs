//! Reading and writing the rows of one entity table.
//!
//! Every read wraps its source (the table or a custom read statement) as
//! `SELECT * FROM (<source>) AS res`, so filters and sorters always address
//! the columns the source exposes. Filters are compiled by `filter-core` and
//! attached with their bind values typed after the matching fields.

use std::fmt;
use std::sync::Arc;

use filter_core::{Filter, Operator, PLACEHOLDER};
use sea_orm::sea_query::{
    Alias, Asterisk, Expr, IntoTableRef, Query, SelectStatement, SimpleExpr, TableRef,
};
use sea_orm::{ConnectionTrait, DbBackend, QueryResult, Statement};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::bind::{decode_column, filter_operand, to_sea};
use crate::db::DbHandle;
use crate::entity::{Entity, SetOptions};
use crate::error::{EntityError, EntityResult};
use crate::field::Field;
use crate::params::{ReadPage, ReadParams, Sorters};
use crate::schema::EntitySchema;
use crate::value::{row_to_json, Row, Value};

const RESULT_ALIAS: &str = "res";
const COUNT_COLUMN: &str = "totcount";

/// Table gateway of one entity schema.
#[derive(Clone)]
pub struct EntityRepository {
    db: DbHandle,
    schema: Arc<EntitySchema>,
    read_statement: Option<SelectStatement>,
    default_filter_operator: Operator,
    allow_empty_filters: bool,
}

impl fmt::Debug for EntityRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRepository")
            .field("entity", &self.schema.name())
            .field("table", &self.schema.table_name(true))
            .field("engine", &self.db.engine())
            .finish_non_exhaustive()
    }
}

impl EntityRepository {
    pub fn new(db: DbHandle, schema: Arc<EntitySchema>) -> Self {
        Self {
            default_filter_operator: schema.default_filter_operator(),
            allow_empty_filters: schema.allow_empty_filters(),
            db,
            schema,
            read_statement: None,
        }
    }

    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    /// A blank entity bound to this repository.
    pub fn entity(&self) -> Entity {
        Entity::with_repository(self.clone())
    }

    /// An entity filled with `data`.
    pub async fn create(&self, data: Row, opts: SetOptions) -> EntityResult<Entity> {
        let mut entity = self.entity();
        entity.set_data(data, opts).await?;
        Ok(entity)
    }

    pub fn table_name(&self, with_schema: bool) -> String {
        self.schema.table_name(with_schema)
    }

    /// Replace the table as read source, e.g. with a join exposing extra
    /// declared (non persisted) fields.
    pub fn set_read_statement(&mut self, statement: SelectStatement) -> &mut Self {
        self.read_statement = Some(statement);
        self
    }

    pub fn default_filter_operator(&self) -> Operator {
        self.default_filter_operator
    }

    pub fn set_default_filter_operator(&mut self, op: Operator) -> &mut Self {
        self.default_filter_operator = op;
        self
    }

    pub fn allow_empty_filters(&self) -> bool {
        self.allow_empty_filters
    }

    pub fn set_allow_empty_filters(&mut self, allow: bool) -> &mut Self {
        self.allow_empty_filters = allow;
        self
    }

    /// A filter using this repository's default operator.
    pub fn filter_instance(&self) -> Filter {
        Filter::with_default_operator(self.default_filter_operator)
    }

    pub fn parse_filters(&self, filters: &JsonValue) -> EntityResult<Filter> {
        Ok(Filter::from_value(filters, self.default_filter_operator)?)
    }

    /// Fill page, limit and offset and merge the fixed filters.
    pub fn query_params(&self, params: ReadParams) -> ReadParams {
        params.normalized(self.allow_empty_filters)
    }

    /// Requested sorters, or the schema defaults, followed by the identity
    /// fields in ascending order so pages are stable.
    pub fn sorters(&self, requested: &Sorters) -> Sorters {
        let mut sorters = if requested.is_empty() {
            self.schema.default_sorters().clone()
        } else {
            requested.clone()
        };
        for id in self.schema.identity(false) {
            if !sorters.contains_key(id) {
                sorters.insert(id.to_string(), Default::default());
            }
        }
        sorters
    }

    fn table_ref(&self) -> TableRef {
        let table = Alias::new(self.schema.table_name(false));
        match self.schema.schema_name() {
            Some(schema) => (Alias::new(schema), table).into_table_ref(),
            None => table.into_table_ref(),
        }
    }

    fn source(&self) -> SelectStatement {
        match &self.read_statement {
            Some(statement) => statement.clone(),
            None => Query::select()
                .column(Asterisk)
                .from(self.table_ref())
                .to_owned(),
        }
    }

    pub fn read_query(&self) -> SelectStatement {
        Query::select()
            .column(Asterisk)
            .from_subquery(self.source(), Alias::new(RESULT_ALIAS))
            .to_owned()
    }

    pub fn count_query(&self) -> SelectStatement {
        Query::select()
            .expr_as(Expr::cust("COUNT(1)"), Alias::new(COUNT_COLUMN))
            .from_subquery(self.source(), Alias::new(RESULT_ALIAS))
            .to_owned()
    }

    pub fn prepare_query(
        &self,
        query: &mut SelectStatement,
        filter: &Filter,
        sorters: &Sorters,
        limit: u64,
        offset: u64,
    ) -> EntityResult<()> {
        self.prepare_filters(query, filter)?;
        self.prepare_sorters(query, sorters)?;
        self.prepare_limit_offset(query, limit, offset);
        Ok(())
    }

    pub fn prepare_filters(&self, query: &mut SelectStatement, filter: &Filter) -> EntityResult<()> {
        if let Some(condition) = self.filter_condition(filter)? {
            query.and_where(condition);
        }
        Ok(())
    }

    fn field_for(&self, name: &str) -> Option<&Field> {
        self.schema
            .field(name)
            .or_else(|| self.schema.field_by_column(name))
    }

    fn filter_condition(&self, filter: &Filter) -> EntityResult<Option<SimpleExpr>> {
        if filter.is_empty() {
            return Ok(None);
        }
        let targets = filter.bind_targets()?;
        let mut filter = filter.clone();
        filter.map_fields(&|name| {
            self.schema
                .field(name)
                .map(|f| f.column_name().to_string())
                .filter(|column| column != name)
        })?;
        let compiled = filter.compile()?;
        if compiled.is_empty() {
            return Ok(None);
        }
        let values = compiled
            .values
            .iter()
            .zip(&targets)
            .map(|(value, (field, op))| filter_operand(self.field_for(field), *op, value))
            .collect::<EntityResult<Vec<_>>>()?;
        let sql = match self.backend() {
            DbBackend::Postgres => numbered_placeholders(&compiled.sql),
            _ => compiled.sql,
        };
        Ok(Some(Expr::cust_with_values(sql, values)))
    }

    pub fn prepare_sorters(&self, query: &mut SelectStatement, sorters: &Sorters) -> EntityResult<()> {
        for (name, dir) in sorters {
            let column = match self.schema.field(name) {
                Some(field) => field.column_name().to_string(),
                None => {
                    filter_core::validate_field_name(name)?;
                    name.clone()
                }
            };
            query.order_by_expr(Expr::cust(column), dir.order());
        }
        Ok(())
    }

    pub fn prepare_limit_offset(&self, query: &mut SelectStatement, limit: u64, offset: u64) {
        // Bound as signed 64 bit integers.
        let limit = limit.min(i64::MAX as u64);
        let offset = offset.min(i64::MAX as u64);
        if limit > 0 {
            query.limit(limit);
        }
        if offset > 0 {
            // MySQL and SQLite only accept OFFSET after a LIMIT.
            if limit == 0 && self.backend() != DbBackend::Postgres {
                query.limit(i64::MAX as u64);
            }
            query.offset(offset);
        }
    }

    fn backend(&self) -> DbBackend {
        self.db.seaorm().get_database_backend()
    }

    pub(crate) fn build<S: sea_orm::StatementBuilder>(&self, statement: &S) -> Statement {
        self.backend().build(statement)
    }

    fn decode_row(&self, row: &QueryResult) -> Row {
        self.schema
            .fields()
            .filter_map(|field| {
                decode_column(row, field.column_name(), Some(field))
                    .map(|value| (field.name().to_string(), value))
            })
            .collect()
    }

    /// Run a select and decode its rows by the declared fields.
    pub async fn read(&self, query: &SelectStatement) -> EntityResult<Vec<Row>> {
        let statement = self.build(query);
        debug!(entity = self.schema.name(), sql = %statement.sql, "read");
        let rows = self.db.seaorm().query_all(statement).await?;
        Ok(rows.iter().map(|row| self.decode_row(row)).collect())
    }

    pub async fn read_row(&self, query: &SelectStatement) -> EntityResult<Option<Row>> {
        let statement = self.build(query);
        debug!(entity = self.schema.name(), sql = %statement.sql, "read row");
        let row = self.db.seaorm().query_one(statement).await?;
        Ok(row.map(|row| self.decode_row(&row)))
    }

    /// Run a `COUNT(1) AS totcount` query.
    pub async fn count(&self, query: &SelectStatement) -> EntityResult<u64> {
        let statement = self.build(query);
        debug!(entity = self.schema.name(), sql = %statement.sql, "count");
        let total = match self.db.seaorm().query_one(statement).await? {
            Some(row) => row.try_get::<i64>("", COUNT_COLUMN)?,
            None => 0,
        };
        Ok(u64::try_from(total).unwrap_or_default())
    }

    async fn count_filtered(&self, filter: &Filter) -> EntityResult<u64> {
        let mut query = self.count_query();
        self.prepare_filters(&mut query, filter)?;
        self.count(&query).await
    }

    /// One page of rows. Pass params through [`Self::query_params`] first to
    /// get the default paging.
    pub async fn read_all(&self, params: &ReadParams) -> EntityResult<ReadPage<Row>> {
        let filter = self.parse_filters(&params.filters)?;
        let sorters = self.sorters(&params.sorters);
        let limit = params.limit.unwrap_or(0);
        let offset = params.offset.unwrap_or(0);

        let mut query = self.read_query();
        self.prepare_query(&mut query, &filter, &sorters, limit, offset)?;
        let mut data = self.read(&query).await?;
        if !params.export_fields.is_empty() {
            for row in &mut data {
                row.retain(|name, _| params.export_fields.iter().any(|f| f == name));
            }
        }

        let total = if data.is_empty() || !params.execute_count.unwrap_or(true) {
            0
        } else {
            self.count_filtered(&filter).await?
        };
        Ok(ReadPage::new(data, total, params.page.unwrap_or(1), offset, limit))
    }

    /// Distinct values of `selectParams.distinctFields`, paged like
    /// [`Self::read_all`].
    pub async fn read_select_data(&self, params: &ReadParams) -> EntityResult<ReadPage<Row>> {
        let distinct = &params.select_params.distinct_fields;
        if distinct.is_empty() {
            return Err(EntityError::InvalidParams(
                "selectParams.distinctFields is empty".to_string(),
            ));
        }
        let mut columns = Vec::with_capacity(distinct.len());
        for name in distinct {
            let field = self
                .schema
                .field(name)
                .ok_or_else(|| EntityError::UnknownField(name.clone()))?;
            columns.push(Alias::new(field.column_name()));
        }

        let filter = self.parse_filters(&params.filters)?;
        let mut query = Query::select()
            .distinct()
            .columns(columns)
            .from_subquery(self.source(), Alias::new(RESULT_ALIAS))
            .to_owned();
        self.prepare_filters(&mut query, &filter)?;
        let count_query = Query::select()
            .expr_as(Expr::cust("COUNT(1)"), Alias::new(COUNT_COLUMN))
            .from_subquery(query.clone(), Alias::new("cnt"))
            .to_owned();

        let limit = params.limit.unwrap_or(0);
        let offset = params.offset.unwrap_or(0);
        self.prepare_sorters(&mut query, &params.sorters)?;
        self.prepare_limit_offset(&mut query, limit, offset);

        let data = self.read(&query).await?;
        let total = if data.is_empty() || !params.execute_count.unwrap_or(true) {
            0
        } else {
            self.count(&count_query).await?
        };
        Ok(ReadPage::new(data, total, params.page.unwrap_or(1), offset, limit))
    }

    pub async fn read_count(&self, params: &ReadParams) -> EntityResult<u64> {
        let filter = self.parse_filters(&params.filters)?;
        self.count_filtered(&filter).await
    }

    pub async fn read_by(&self, filter: &Filter) -> EntityResult<Vec<Row>> {
        let mut query = self.read_query();
        self.prepare_filters(&mut query, filter)?;
        self.read(&query).await
    }

    pub async fn read_one_by(&self, filter: &Filter) -> EntityResult<Option<Row>> {
        let mut query = self.read_query();
        self.prepare_filters(&mut query, filter)?;
        query.limit(1);
        self.read_row(&query).await
    }

    /// First row of `key` (field → value, compared with equals).
    pub(crate) async fn read_one_by_key(&self, key: &Row) -> EntityResult<Option<Row>> {
        let filter = self.key_filter(key)?;
        self.read_one_by(&filter).await
    }

    fn key_filter(&self, key: &Row) -> EntityResult<Filter> {
        let mut filter = Filter::with_default_operator(Operator::Equals);
        for (name, value) in key {
            match value {
                Value::Null => filter.add_rule(name, Some(Operator::IsNull), None)?,
                value => filter.add_rule_equals(name, value.to_json())?,
            };
        }
        Ok(filter)
    }

    /// Entity of the first row of `query`.
    pub async fn find(&self, query: &SelectStatement) -> EntityResult<Option<Entity>> {
        match self.read_row(query).await? {
            Some(row) => Ok(Some(self.create(row, SetOptions::quiet()).await?)),
            None => Ok(None),
        }
    }

    /// Entities matching every `key` value.
    pub async fn find_by(&self, key: &Row) -> EntityResult<Vec<Entity>> {
        if key.is_empty() {
            return Err(EntityError::NoKeyData);
        }
        let filter = self.key_filter(key)?;
        let opts = SetOptions {
            default_on_empty: false,
            ..SetOptions::quiet()
        };
        let mut entities = Vec::new();
        for row in self.read_by(&filter).await? {
            entities.push(self.create(row, opts).await?);
        }
        Ok(entities)
    }

    pub async fn find_one_by(&self, key: &Row) -> EntityResult<Option<Entity>> {
        if key.is_empty() {
            return Err(EntityError::NoKeyData);
        }
        let opts = SetOptions {
            default_on_empty: false,
            ..SetOptions::quiet()
        };
        match self.read_one_by_key(key).await? {
            Some(row) => Ok(Some(self.create(row, opts).await?)),
            None => Ok(None),
        }
    }

    fn column_values(&self, values: &Row) -> Vec<(Alias, sea_orm::Value)> {
        values
            .iter()
            .map(|(name, value)| {
                let field = self.schema.field_or_undeclared(name);
                (
                    Alias::new(field.column_name()),
                    to_sea(field.field_type(), value),
                )
            })
            .collect()
    }

    fn key_conditions(&self, key: &Row) -> EntityResult<Vec<SimpleExpr>> {
        if key.is_empty() || key.values().all(Value::is_null) {
            return Err(EntityError::EmptyIdentity);
        }
        Ok(self
            .column_values(key)
            .into_iter()
            .zip(key.values())
            .map(|((column, bound), value)| match value {
                Value::Null => Expr::col(column).is_null(),
                _ => Expr::col(column).eq(SimpleExpr::Value(bound)),
            })
            .collect())
    }

    /// Insert one row keyed by field names. Returns the generated identity
    /// when the schema has one.
    pub(crate) async fn insert_row(&self, values: &Row) -> EntityResult<Option<i64>> {
        let mut insert = Query::insert();
        insert.into_table(self.table_ref());
        let pairs = self.column_values(values);
        if pairs.is_empty() {
            insert.or_default_values();
        } else {
            let (columns, bound): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
            insert.columns(columns);
            insert.values(bound.into_iter().map(SimpleExpr::Value))?;
        }

        let generated = self
            .schema
            .identity_column_names(true)
            .first()
            .map(|c| c.to_string());
        let conn = self.db.seaorm();
        if let (Some(column), DbBackend::Postgres) = (&generated, self.backend()) {
            insert.returning_col(Alias::new(column));
            let statement = self.build(&insert);
            debug!(entity = self.schema.name(), sql = %statement.sql, "insert");
            let row = conn.query_one(statement).await?;
            return Ok(match row {
                Some(row) => Some(row.try_get::<i64>("", column)?),
                None => None,
            });
        }

        let statement = self.build(&insert);
        debug!(entity = self.schema.name(), sql = %statement.sql, "insert");
        let result = conn.execute(statement).await?;
        Ok(generated.map(|_| result.last_insert_id() as i64))
    }

    /// Update the rows matching `key`. Returns the affected row count.
    pub(crate) async fn update_rows(&self, values: &Row, key: &Row) -> EntityResult<u64> {
        let conditions = self.key_conditions(key)?;
        if values.is_empty() {
            return Ok(0);
        }
        let mut update = Query::update();
        update.table(self.table_ref()).values(
            self.column_values(values)
                .into_iter()
                .map(|(column, value)| (column, SimpleExpr::Value(value))),
        );
        for condition in conditions {
            update.and_where(condition);
        }
        let statement = self.build(&update);
        debug!(entity = self.schema.name(), sql = %statement.sql, "update");
        Ok(self.db.seaorm().execute(statement).await?.rows_affected())
    }

    pub(crate) async fn delete_rows(&self, key: &Row) -> EntityResult<u64> {
        let conditions = self.key_conditions(key)?;
        let mut delete = Query::delete();
        delete.from_table(self.table_ref());
        for condition in conditions {
            delete.and_where(condition);
        }
        let statement = self.build(&delete);
        debug!(entity = self.schema.name(), sql = %statement.sql, "delete");
        Ok(self.db.seaorm().execute(statement).await?.rows_affected())
    }

    /// Rows as JSON objects, in read order.
    pub fn rows_to_json(rows: &[Row]) -> JsonValue {
        JsonValue::Array(rows.iter().map(row_to_json).collect())
    }
}

/// Postgres custom expressions reference their values as `$1..$n`.
fn numbered_placeholders(sql: &str) -> String {
    let mut parts = sql.split(PLACEHOLDER);
    let mut out = parts.next().unwrap_or_default().to_string();
    for (i, part) in parts.enumerate() {
        out.push_str(&format!("${}", i + 1));
        out.push_str(part);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_placeholders() {
        assert_eq!(
            numbered_placeholders("a=? AND (b IN (?,?))"),
            "a=$1 AND (b IN ($2,$3))"
        );
        assert_eq!(numbered_placeholders("1=1"), "1=1");
    }
}
