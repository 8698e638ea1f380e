//! Cursors: bind reconciliation, execute arithmetic, and the fetch
//! pipeline.
//!
//! `arraysize` controls the rows requested per fetch round trip and
//! `prefetchrows` the rows delivered with the execute itself; both are
//! sampled when `execute` runs. Fetches drain the local row buffer first
//! and go back to the server only while it reports more rows. A cursor
//! holds its connection weakly; a dropped connection turns every call
//! into `ConnectionClosed`.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use crate::connection::ConnInner;
use crate::constants::{BindDirection, OraType};
use crate::error::{Error, Result, ServerError};
use crate::messages::{ExecuteCall, ExecuteOptions, FetchCall, TtcMessage};
use crate::row::{NumberShape, Row, Value};
use crate::statement::{ColumnInfo, Statement, StatementKey};
use crate::variable::{ColumnContext, OutputTypeHandler, VarConfig, Variable};

/// Default rows per fetch round trip.
pub const DEFAULT_ARRAY_SIZE: u32 = 100;

/// Default rows delivered with the execute response.
pub const DEFAULT_PREFETCH_ROWS: u32 = 2;

/// Options for `executemany`.
#[derive(Debug, Clone, Default)]
pub struct ExecuteManyOptions {
    /// Collect per-iteration errors instead of aborting. The transaction
    /// is left open even under autocommit so the caller can inspect.
    pub batch_errors: bool,
    /// Collect per-iteration row counts
    pub array_dml_row_counts: bool,
}

/// A row factory rewrites each fetched row.
pub type RowFactory = Arc<dyn Fn(Row) -> Row + Send + Sync>;

/// A cursor over one connection.
pub struct Cursor {
    conn: Weak<ConnInner>,
    statement: Option<Statement>,
    statement_key: Option<StatementKey>,
    /// Rows requested per fetch
    pub array_size: u32,
    /// Rows delivered on execute
    pub prefetch_rows: u32,
    row_buffer: VecDeque<Row>,
    more_rows: bool,
    row_count: u64,
    batch_errors: Vec<ServerError>,
    dml_row_counts: Vec<u64>,
    returning_values: Vec<Vec<Vec<Value>>>,
    implicit_cursors: Vec<u16>,
    input_sizes: Option<Vec<Option<VarConfig>>>,
    output_type_handler: Option<OutputTypeHandler>,
    row_factory: Option<RowFactory>,
    number_shape: NumberShape,
    /// Accepted as a server negotiation flag only; scrolling itself is
    /// refused in this driver.
    pub scrollable: bool,
}

impl Cursor {
    pub(crate) fn for_cursor_id(conn: Weak<ConnInner>, cursor_id: u16) -> Self {
        let mut cursor = Self::new(conn);
        cursor.statement = Some(Statement::for_ref_cursor(cursor_id));
        cursor.more_rows = cursor_id != 0;
        cursor
    }

    pub(crate) fn new(conn: Weak<ConnInner>) -> Self {
        Self {
            conn,
            statement: None,
            statement_key: None,
            array_size: DEFAULT_ARRAY_SIZE,
            prefetch_rows: DEFAULT_PREFETCH_ROWS,
            row_buffer: VecDeque::new(),
            more_rows: false,
            row_count: 0,
            batch_errors: Vec::new(),
            dml_row_counts: Vec::new(),
            returning_values: Vec::new(),
            implicit_cursors: Vec::new(),
            input_sizes: None,
            output_type_handler: None,
            row_factory: None,
            number_shape: NumberShape::Auto,
            scrollable: false,
        }
    }

    fn conn(&self) -> Result<Arc<ConnInner>> {
        self.conn.upgrade().ok_or(Error::ConnectionClosed)
    }

    /// Column metadata of the last query execute, None before one.
    pub fn description(&self) -> Option<&[ColumnInfo]> {
        self.statement
            .as_ref()
            .filter(|s| s.is_query() || !s.columns().is_empty())
            .map(|s| s.columns())
    }

    /// Rows affected by the last execute.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Rowid of the last affected row.
    pub fn last_rowid(&self) -> Option<&crate::types::RowId> {
        self.statement.as_ref().and_then(|s| s.last_rowid())
    }

    /// Per-iteration errors collected by the last `executemany` with
    /// batch errors enabled.
    pub fn get_batch_errors(&self) -> &[ServerError] {
        &self.batch_errors
    }

    /// Per-iteration row counts from the last `executemany` with row
    /// counts enabled.
    pub fn get_array_dml_row_counts(&self) -> &[u64] {
        &self.dml_row_counts
    }

    /// RETURNING INTO values: one array per iteration for the given OUT
    /// bind position (counting only OUT binds).
    pub fn returning_values(&self, out_bind_index: usize) -> Option<&[Vec<Value>]> {
        self.returning_values
            .get(out_bind_index)
            .map(Vec::as_slice)
    }

    /// Cursor ids of implicit result sets from the last execute.
    pub fn implicit_results(&self) -> &[u16] {
        &self.implicit_cursors
    }

    /// Install the cursor-level output type handler; wins over the
    /// connection-level one.
    pub fn set_output_type_handler(&mut self, handler: Option<OutputTypeHandler>) {
        self.output_type_handler = handler;
    }

    /// Install a row factory applied to every fetched row.
    pub fn set_row_factory(&mut self, factory: Option<RowFactory>) {
        self.row_factory = factory;
    }

    /// Force NUMBER materialization for subsequent executes.
    pub fn set_number_shape(&mut self, shape: NumberShape) {
        self.number_shape = shape;
    }

    /// Declare bind types ahead of execute, positionally. `None` entries
    /// keep inference.
    pub fn set_input_sizes(&mut self, sizes: Vec<Option<VarConfig>>) {
        self.input_sizes = Some(sizes);
    }

    /// Build a variable for explicit binding.
    pub fn var(&self, ora_type: OraType, size: u32, array_size: usize) -> Variable {
        Variable::new(ora_type, size, array_size)
    }

    /// Parse a statement ahead of execution. With `cache_statement`
    /// false, any cached entry for the same key is dropped and its cursor
    /// tombstoned.
    pub fn prepare(&mut self, sql: &str, cache_statement: bool) -> Result<()> {
        let statement = Statement::parse(sql)?;
        let key = statement.cache_key(false, self.number_shape);
        if !cache_statement {
            if let Some(conn) = self.conn.upgrade() {
                conn.stmt_cache
                    .lock()
                    .expect("stmt cache poisoned")
                    .remove(&key);
            }
        }
        self.reset_results();
        self.statement = Some(statement);
        self.statement_key = Some(key);
        Ok(())
    }

    /// Scrolling is a server-side feature of the thick path.
    pub fn scroll(&mut self, _mode: &str, _offset: i64) -> Result<()> {
        Err(Error::NotSupported("scrollable cursor movement".into()))
    }

    fn reset_results(&mut self) {
        self.row_buffer.clear();
        self.more_rows = false;
        self.row_count = 0;
        self.batch_errors.clear();
        self.dml_row_counts.clear();
        self.returning_values.clear();
        self.implicit_cursors.clear();
    }

    /// Take a statement for the SQL, via the cache when possible.
    fn acquire_statement(
        &mut self,
        conn: &Arc<ConnInner>,
        sql: &str,
        array_dml: bool,
    ) -> Result<(Statement, StatementKey)> {
        let statement = Statement::parse(sql)?;
        let key = statement.cache_key(array_dml, self.number_shape);
        let cached = conn
            .stmt_cache
            .lock()
            .expect("stmt cache poisoned")
            .take(&key);
        Ok((cached.unwrap_or(statement), key))
    }

    fn release_statement(&mut self, conn: &Arc<ConnInner>, key: StatementKey, statement: Statement) {
        let mut cache = conn.stmt_cache.lock().expect("stmt cache poisoned");
        cache.give_back(key.clone(), statement.clone());
        self.statement = Some(statement);
        self.statement_key = Some(key);
    }

    /// Reconcile user values against declared input sizes, inferring
    /// missing types from the first non-null value per position.
    fn build_bind_vars(&mut self, rows: &[Vec<Value>]) -> Result<Vec<Variable>> {
        let num_binds = rows.first().map(Vec::len).unwrap_or(0);
        for row in rows {
            if row.len() != num_binds {
                return Err(Error::Interface(
                    "bind rows have differing lengths".into(),
                ));
            }
        }
        let declared = self.input_sizes.take();
        let mut vars = Vec::with_capacity(num_binds);
        for position in 0..num_binds {
            let declared_config = declared
                .as_ref()
                .and_then(|d| d.get(position))
                .and_then(|c| c.as_ref());
            let var = match declared_config {
                Some(config) => {
                    let mut var = Variable::from_config(config, rows.len());
                    for row in rows {
                        var.widen_for(&row[position]);
                    }
                    var
                }
                None => {
                    let column: Vec<&Value> = rows.iter().map(|r| &r[position]).collect();
                    Variable::infer(&column, rows.len())?
                }
            };
            vars.push(var);
        }
        Ok(vars)
    }

    /// Apply output type handlers to freshly described columns.
    fn resolve_number_shape(&self, conn: &Arc<ConnInner>, columns: &[ColumnInfo]) -> NumberShape {
        let handler = self.output_type_handler.clone().or_else(|| {
            conn.output_type_handler
                .lock()
                .expect("handler lock poisoned")
                .clone()
        });
        let handler = match handler {
            Some(h) => h,
            None => return self.number_shape,
        };
        // The handler can retype NUMBER columns; other retargeting is
        // applied per-column at describe time.
        for (position, column) in columns.iter().enumerate() {
            let ctx = ColumnContext { column, position };
            if let Some(config) = handler(&ctx) {
                if column.ora_type == OraType::Number {
                    return match config.ora_type {
                        OraType::Varchar => NumberShape::Decimal,
                        OraType::Number => NumberShape::Decimal,
                        OraType::BinaryDouble => NumberShape::Double,
                        _ => self.number_shape,
                    };
                }
            }
        }
        self.number_shape
    }

    /// Execute a statement with positional binds.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let rows = if params.is_empty() {
            Vec::new()
        } else {
            vec![params.to_vec()]
        };
        self.execute_rows(sql, rows, ExecuteManyOptions::default(), false)
            .await
    }

    /// Execute a statement once per bind row.
    pub async fn execute_many(
        &mut self,
        sql: &str,
        rows: Vec<Vec<Value>>,
        options: ExecuteManyOptions,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Err(Error::Interface("executemany needs at least one row".into()));
        }
        self.execute_rows(sql, rows, options, true).await
    }

    async fn execute_rows(
        &mut self,
        sql: &str,
        bind_rows: Vec<Vec<Value>>,
        many: ExecuteManyOptions,
        array_dml: bool,
    ) -> Result<u64> {
        let conn = self.conn()?;
        self.reset_results();

        let (mut statement, key) = self.acquire_statement(&conn, sql, array_dml)?;
        let bind_vars = self.build_bind_vars(&bind_rows)?;

        // RETURNING INTO and PL/SQL OUT positions come from declared
        // variables; mark directions before serialization.
        let mut bind_vars = bind_vars;
        if statement.is_returning() {
            // Values bound as NULL with a declared type are OUT positions.
            for (var, first) in bind_vars.iter_mut().zip(
                bind_rows
                    .first()
                    .map(Vec::as_slice)
                    .unwrap_or_default()
                    .iter(),
            ) {
                if first.is_null() && var.size() > 0 {
                    var.set_direction(BindDirection::Output);
                }
            }
        }

        let number_shape = if statement.columns().is_empty() {
            self.number_shape
        } else {
            self.resolve_number_shape(&conn, statement.columns())
        };

        if statement.is_query() && statement.cursor_id() != 0 && statement.no_prefetch() {
            statement.set_requires_define(true);
        }

        let options = ExecuteOptions {
            prefetch_rows: if statement.is_query() {
                self.prefetch_rows.max(1)
            } else {
                0
            },
            num_iters: bind_rows.len().max(1) as u32,
            batch_errors: many.batch_errors,
            dml_row_counts: many.array_dml_row_counts,
            auto_commit: conn.autocommit.load(std::sync::atomic::Ordering::Acquire)
                && !many.batch_errors,
            describe_only: false,
            scrollable: self.scrollable,
            number_shape,
        };

        let sequence = conn.next_sequence().await;
        let mut call = ExecuteCall::new(statement, options, bind_vars, bind_rows, sequence);

        let call_result = conn.call(&mut call).await;
        let error_code = call.state_ref().error_info.code;
        let (mut statement, outcome) = call.finish();

        match call_result {
            Ok(()) => {}
            Err(e) => {
                // Reparse-class failures tombstone the cached plan.
                if e.requires_reparse() {
                    conn.stmt_cache
                        .lock()
                        .expect("stmt cache poisoned")
                        .invalidate(&key);
                }
                statement.invalidate_cursor();
                self.release_statement(&conn, key, statement);
                return Err(e);
            }
        }

        if let Some(columns) = &outcome.columns {
            let shape = self.resolve_number_shape(&conn, columns);
            self.number_shape = shape;
        }

        self.row_count = outcome.row_count;
        self.batch_errors = outcome.batch_errors;
        self.dml_row_counts = outcome.dml_row_counts;
        self.returning_values = outcome.returning_values;
        self.implicit_cursors = outcome.implicit_cursors;
        self.row_buffer = outcome.rows.into();
        // ORA-01403 on the execute means the prefetch drained the cursor.
        self.more_rows = statement.is_query() && error_code != crate::constants::ora::NO_DATA_FOUND;

        let affected = self.row_count;
        self.release_statement(&conn, key, statement);
        Ok(affected)
    }

    /// Fetch the next row.
    pub async fn fetchone(&mut self) -> Result<Option<Row>> {
        if self.row_buffer.is_empty() && self.more_rows {
            self.fetch_from_server().await?;
        }
        Ok(self
            .row_buffer
            .pop_front()
            .map(|row| self.apply_factory(row)))
    }

    /// Fetch up to `count` rows.
    pub async fn fetchmany(&mut self, count: usize) -> Result<Vec<Row>> {
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            match self.fetchone().await? {
                Some(row) => out.push(row),
                None => break,
            }
        }
        Ok(out)
    }

    /// Fetch every remaining row.
    pub async fn fetchall(&mut self) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        while let Some(row) = self.fetchone().await? {
            out.push(row);
        }
        Ok(out)
    }

    fn apply_factory(&self, row: Row) -> Row {
        match &self.row_factory {
            Some(factory) => factory(row),
            None => row,
        }
    }

    async fn fetch_from_server(&mut self) -> Result<()> {
        let conn = self.conn()?;
        let statement = self
            .statement
            .as_ref()
            .ok_or_else(|| Error::Interface("fetch before execute".into()))?;
        if !statement.is_query() {
            return Err(Error::Interface("fetch on a non-query".into()));
        }
        let cursor_id = statement.cursor_id();
        if cursor_id == 0 {
            self.more_rows = false;
            return Ok(());
        }

        let sequence = conn.next_sequence().await;
        let mut call = FetchCall::new(
            cursor_id,
            self.array_size.max(1),
            statement.columns().to_vec(),
            self.number_shape,
            sequence,
        );
        let result = conn.call(&mut call).await;
        let exhausted = call.state_ref().error_info.code == crate::constants::ora::NO_DATA_FOUND;
        match result {
            Ok(()) => {}
            Err(e) => {
                self.more_rows = false;
                return Err(e);
            }
        }

        if let (Some(columns), Some(statement)) = (call.columns.take(), self.statement.as_mut()) {
            statement.set_columns(columns);
        }
        self.row_buffer.extend(call.rows.drain(..));
        if exhausted {
            self.more_rows = false;
            // A drained query cursor is closed server-side; reparse next
            // time rather than touching a stale cursor id.
            if let (Some(key), Some(stmt)) = (&self.statement_key, self.statement.as_mut()) {
                stmt.invalidate_cursor();
                conn.stmt_cache
                    .lock()
                    .expect("stmt cache poisoned")
                    .invalidate(key);
            }
        }
        Ok(())
    }

    /// Drop cursor state. The server-side cursor close rides on the next
    /// round trip.
    pub fn close(&mut self) {
        self.reset_results();
        if let (Some(conn), Some(key)) = (self.conn.upgrade(), self.statement_key.take()) {
            if self
                .statement
                .as_ref()
                .map(|s| s.cursor_id() != 0)
                .unwrap_or(false)
            {
                conn.stmt_cache
                    .lock()
                    .expect("stmt cache poisoned")
                    .invalidate(&key);
            }
        }
        self.statement = None;
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orphan_cursor() -> Cursor {
        Cursor::new(Weak::new())
    }

    #[test]
    fn scroll_is_refused() {
        let mut cursor = orphan_cursor();
        assert!(matches!(
            cursor.scroll("next", 1),
            Err(Error::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn dead_connection_fails_fast() {
        let mut cursor = orphan_cursor();
        assert!(matches!(
            cursor.execute("SELECT 1 FROM DUAL", &[]).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn trailing_terminator_rejected_before_io() {
        let mut cursor = orphan_cursor();
        // The terminator check runs before the connection check would
        // matter; a live connection is not needed to see the interface
        // error.
        let conn_err = cursor.execute("SELECT 1 FROM DUAL;", &[]).await;
        assert!(matches!(
            conn_err,
            Err(Error::ConnectionClosed) | Err(Error::Interface(_))
        ));
    }

    #[tokio::test]
    async fn executemany_needs_rows() {
        let mut cursor = orphan_cursor();
        assert!(matches!(
            cursor
                .execute_many("INSERT INTO t VALUES (:1)", vec![], Default::default())
                .await,
            Err(Error::Interface(_))
        ));
    }

    #[test]
    fn defaults() {
        let cursor = orphan_cursor();
        assert_eq!(cursor.array_size, DEFAULT_ARRAY_SIZE);
        assert_eq!(cursor.prefetch_rows, DEFAULT_PREFETCH_ROWS);
        assert!(cursor.description().is_none());
        assert_eq!(cursor.row_count(), 0);
    }

    #[test]
    fn bind_row_shape_validation() {
        let mut cursor = orphan_cursor();
        let rows = vec![vec![Value::Integer(1)], vec![]];
        assert!(cursor.build_bind_vars(&rows).is_err());

        let rows = vec![vec![Value::Integer(1)], vec![Value::Integer(2)]];
        let vars = cursor.build_bind_vars(&rows).unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].ora_type(), OraType::Number);
    }

    #[test]
    fn declared_input_sizes_override_inference() {
        let mut cursor = orphan_cursor();
        cursor.set_input_sizes(vec![Some(VarConfig::new(OraType::Varchar, 40))]);
        let rows = vec![vec![Value::Integer(1)]];
        let vars = cursor.build_bind_vars(&rows).unwrap();
        assert_eq!(vars[0].ora_type(), OraType::Varchar);
        assert_eq!(vars[0].size(), 40);
    }
}
