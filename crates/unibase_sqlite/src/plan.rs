//! Query plans behind relational cursors.

use crate::codec::quote;
use crate::engine::{render_all, Engine, Row};
use crate::error::backend_error;
use crate::lower::{lower_filter, Target};
use crate::sql::{column_name, joined_alias, DEFAULT_SORT, ID_COLUMN, JOINED_PREFIX, SEQUENCE_COLUMN};
use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use unibase_core::schema::{nest_columns, project};
use unibase_core::{
    CacheLookup, Filter, Join, QueryCache, QueryPlan, Result, Schema, SortOrder, ValidationError,
};

const BASE: &str = "base";

struct JoinClause {
    alias: String,
    table: String,
    output: String,
    local: String,
    foreign: String,
    /// `(column, storage tag)` of the joined table; empty when it does not exist.
    columns: Vec<(String, String)>,
}

impl JoinClause {
    fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|(c, _)| c == column)
    }
}

/// `SELECT` accumulated by a relational cursor.
///
/// Joins are `LEFT OUTER JOIN`s matching by substring, so a text column
/// holding an encoded list of ids joins every listed row. With joins the
/// window is applied after rows are grouped by record id.
pub struct SqlitePlan {
    engine: Arc<Engine>,
    cache: Arc<QueryCache>,
    table: String,
    columns: HashMap<String, &'static str>,
    filters: Vec<String>,
    values: Vec<SqlValue>,
    order: Option<(String, SortOrder)>,
    window: Option<(u64, Option<u64>)>,
    joins: Vec<JoinClause>,
}

impl SqlitePlan {
    pub(crate) fn new(engine: Arc<Engine>, cache: Arc<QueryCache>, table: &str, schema: &Schema) -> Self {
        let columns = project(schema)
            .into_iter()
            .map(|c| (c.name.clone(), c.storage_tag()))
            .collect();
        Self {
            engine,
            cache,
            table: table.to_string(),
            columns,
            filters: Vec::new(),
            values: Vec::new(),
            order: None,
            window: None,
            joins: Vec::new(),
        }
    }

    fn resolve(&self, field: &str) -> Option<Target> {
        if let Some((head, rest)) = field.split_once('.') {
            if let Some(join) = self.joins.iter().find(|j| j.output == head) {
                let column = column_name(rest);
                return join
                    .has_column(&column)
                    .then(|| Target::Joined(format!("{}.{}", join.alias, quote(&column))));
            }
        }
        let column = column_name(field);
        self.columns
            .contains_key(&column)
            .then(|| Target::Column(format!("{BASE}.{}", quote(&column))))
    }

    fn expression(target: Target) -> String {
        match target {
            Target::Column(expr) | Target::Joined(expr) => expr,
        }
    }

    fn from_clause(&self) -> String {
        let mut sql = format!("FROM {} AS {BASE}", quote(&self.table));
        for join in self.joins.iter().filter(|j| !j.columns.is_empty()) {
            sql.push_str(&format!(
                " LEFT OUTER JOIN {table} AS {alias} ON {local} LIKE '%' || {alias}.{foreign} || '%'",
                table = quote(&join.table),
                alias = join.alias,
                local = join.local,
                foreign = quote(&join.foreign),
            ));
        }
        if !self.filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.filters.join(" AND "));
        }
        sql
    }

    fn select_list(&self) -> String {
        let mut fields = vec![format!("{BASE}.*")];
        for join in &self.joins {
            for (column, _) in &join.columns {
                fields.push(format!(
                    "{}.{} AS {}",
                    join.alias,
                    quote(column),
                    quote(&joined_alias(&join.output, column))
                ));
            }
        }
        fields.join(", ")
    }

    /// The fetch statement.
    pub fn select_sql(&self) -> String {
        let (order_expr, direction) = match &self.order {
            Some((expr, order)) => (expr.clone(), *order),
            None => (format!("{BASE}.{}", quote(DEFAULT_SORT)), SortOrder::Desc),
        };
        let direction = match direction {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let mut sql = format!(
            "SELECT {} {} ORDER BY {order_expr} {direction}, {BASE}.{} ASC",
            self.select_list(),
            self.from_clause(),
            quote(SEQUENCE_COLUMN)
        );
        if let (Some((from, to)), true) = (self.window, self.joins.is_empty()) {
            match to {
                Some(to) => sql.push_str(&format!(" LIMIT {} OFFSET {from}", to - from)),
                None => sql.push_str(&format!(" LIMIT -1 OFFSET {from}")),
            }
        }
        sql.push(';');
        sql
    }

    /// The count statement.
    pub fn count_sql(&self) -> String {
        format!(
            "SELECT COUNT(DISTINCT {BASE}.{}) {};",
            quote(ID_COLUMN),
            self.from_clause()
        )
    }

    fn tag_of(&self, name: &str) -> Option<&str> {
        if let Some(tag) = self.columns.get(name) {
            return Some(*tag);
        }
        self.joins.iter().find_map(|join| {
            join.columns
                .iter()
                .find(|(column, _)| joined_alias(&join.output, column) == name)
                .map(|(_, tag)| tag.as_str())
        })
    }

    /// Groups rows by record id, collecting joined fragments under
    /// `joined_collections.<output>`.
    fn group(&self, rows: Vec<Row>) -> Vec<Value> {
        let prefixes: Vec<(String, &str)> = self
            .joins
            .iter()
            .map(|j| (joined_alias(&j.output, ""), j.output.as_str()))
            .collect();

        let mut records: Vec<Map<String, Value>> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for row in rows {
            let mut own = Vec::new();
            let mut fragments: HashMap<&str, Vec<(String, Value)>> = HashMap::new();
            for (name, value) in row {
                match prefixes.iter().find(|(p, _)| name.starts_with(p.as_str())) {
                    Some((prefix, output)) => fragments
                        .entry(*output)
                        .or_default()
                        .push((name[prefix.len()..].to_string(), value)),
                    None => own.push((name, value)),
                }
            }

            let record = nest_columns(own);
            let id = record.get(ID_COLUMN).map(Value::to_string).unwrap_or_default();
            let pos = *positions.entry(id).or_insert_with(|| {
                let mut record = record;
                if !self.joins.is_empty() {
                    let joined = self
                        .joins
                        .iter()
                        .map(|j| (j.output.clone(), Value::Array(Vec::new())))
                        .collect::<Map<_, _>>();
                    record.insert(JOINED_PREFIX.to_string(), Value::Object(joined));
                }
                records.push(record);
                records.len() - 1
            });

            for (output, cells) in fragments {
                let fragment = Value::Object(nest_columns(cells));
                let fragment_id = fragment.get(ID_COLUMN).cloned().unwrap_or(Value::Null);
                if fragment_id.is_null() {
                    continue;
                }
                let list = records[pos]
                    .get_mut(JOINED_PREFIX)
                    .and_then(|j| j.get_mut(output))
                    .and_then(Value::as_array_mut);
                if let Some(list) = list {
                    if !list.iter().any(|f| f.get(ID_COLUMN) == Some(&fragment_id)) {
                        list.push(fragment);
                    }
                }
            }
        }
        records.into_iter().map(Value::Object).collect()
    }
}

impl QueryPlan for SqlitePlan {
    fn collection(&self) -> &str {
        &self.table
    }

    fn filter(&mut self, filter: &Filter) -> Result<()> {
        let mut values = Vec::new();
        let sql = lower_filter(filter, &|field: &str| self.resolve(field), &mut values)?;
        self.filters.push(format!("({sql})"));
        self.values.extend(values);
        Ok(())
    }

    fn sort(&mut self, key: &str, order: SortOrder) -> Result<()> {
        let target = self.resolve(key).ok_or_else(|| ValidationError::UnknownSortKey {
            key: key.to_string(),
        })?;
        self.order = Some((Self::expression(target), order));
        Ok(())
    }

    fn limit(&mut self, from: u64, to: Option<u64>) -> Result<()> {
        self.window = Some((from, to));
        Ok(())
    }

    fn join(&mut self, join: &Join) -> Result<()> {
        let columns = self
            .engine
            .table_info(&join.table)
            .map_err(|e| backend_error("error reading joined table", e))?;
        let local = self
            .resolve(&join.local_field)
            .map(Self::expression)
            .ok_or_else(|| ValidationError::InvalidFieldName {
                name: join.local_field.clone(),
            })?;
        let foreign = column_name(&join.foreign_field);
        if !columns.is_empty() && !columns.iter().any(|(c, _)| *c == foreign) {
            return Err(ValidationError::InvalidFieldName {
                name: join.foreign_field.clone(),
            }
            .into());
        }

        self.joins.push(JoinClause {
            alias: format!("j{}", self.joins.len()),
            table: join.table.clone(),
            output: join.output.clone(),
            local,
            foreign,
            columns,
        });
        Ok(())
    }

    fn count(&self) -> Result<u64> {
        let sql = self.count_sql();
        let signature = QueryCache::signature(&format!("{sql} [{}]", render_all(&self.values)));
        let generation = match self.cache.get(&self.table, &signature) {
            CacheLookup::Hit(count) => return Ok(count),
            CacheLookup::Miss(generation) => generation,
        };
        let count = self
            .engine
            .scalar(&sql, &self.values)
            .map_err(|e| backend_error("error counting rows", e))?;
        let count = u64::try_from(count).unwrap_or(0);
        let joined: Vec<String> = self.joins.iter().map(|j| j.table.clone()).collect();
        self.cache.set(&self.table, &joined, &signature, count, generation);
        Ok(count)
    }

    fn fetch(&self) -> Result<Vec<Value>> {
        if let Some((from, Some(to))) = self.window {
            if from == to {
                return Ok(Vec::new());
            }
        }
        let rows = self
            .engine
            .select(&self.select_sql(), &self.values, |name| self.tag_of(name))
            .map_err(|e| backend_error("error fetching rows", e))?;
        let mut records = self.group(rows);

        if let (Some((from, to)), false) = (self.window, self.joins.is_empty()) {
            let end = to.map_or(records.len(), |to| (to as usize).min(records.len()));
            let start = (from as usize).min(end);
            records = records.drain(start..end).collect();
        }
        debug!(table = %self.table, records = records.len(), "rows grouped");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan() -> SqlitePlan {
        let engine = Arc::new(Engine::open(crate::engine::IN_MEMORY).unwrap());
        let schema = Schema::builder().text("name").integer("count").build();
        SqlitePlan::new(engine, Arc::new(QueryCache::new(false, 0)), "Counter", &schema)
    }

    #[test]
    fn default_statement() {
        assert_eq!(
            plan().select_sql(),
            "SELECT base.* FROM \"Counter\" AS base \
             ORDER BY base.\"created__timestamp\" DESC, base.\"seq\" ASC;"
        );
    }

    #[test]
    fn filter_sort_and_window() {
        let mut plan = plan();
        plan.filter(&Filter::parse(&json!(["count", ">", 1])).unwrap())
            .unwrap();
        plan.filter(&Filter::parse(&json!(["name", "regex", "a"])).unwrap())
            .unwrap();
        plan.sort("count", SortOrder::Asc).unwrap();
        plan.limit(2, None).unwrap();

        assert_eq!(
            plan.select_sql(),
            "SELECT base.* FROM \"Counter\" AS base \
             WHERE (base.\"count\" > ?) AND (base.\"name\" LIKE ?) \
             ORDER BY base.\"count\" ASC, base.\"seq\" ASC LIMIT -1 OFFSET 2;"
        );
        assert_eq!(
            plan.count_sql(),
            "SELECT COUNT(DISTINCT base.\"id\") FROM \"Counter\" AS base \
             WHERE (base.\"count\" > ?) AND (base.\"name\" LIKE ?);"
        );
        assert_eq!(plan.values.len(), 2);
    }

    #[test]
    fn bounded_window() {
        let mut plan = plan();
        plan.limit(5, Some(15)).unwrap();
        assert!(plan.select_sql().ends_with(" LIMIT 10 OFFSET 5;"));
    }

    #[test]
    fn empty_window_skips_the_engine() {
        let mut plan = plan();
        plan.limit(3, Some(3)).unwrap();
        assert!(plan.fetch().unwrap().is_empty());
    }

    #[test]
    fn unknown_join_field_is_rejected() {
        let mut plan = plan();
        let err = plan
            .join(&Join::new("Other", "ghost", "others").on("parent"))
            .unwrap_err();
        assert!(err.is_client_error());
    }
}
