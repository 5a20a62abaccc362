//! SQLite reference backend.
//!
//! # Responsibility
//! - Implement the backend contract over a rusqlite connection: SQL
//!   generation, parameter binding and row decoding.
//! - Provide the transactional capability (commit on success, rollback on
//!   error).
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON` when opened through the
//!   bootstrap helpers.
//! - Row decoding honors the `Structured` field layout when the entity
//!   declares one; undeclared columns are dropped.
//! - A transaction handle never escapes the unit of work it was created for.

use crate::backend::{Backend, Ordering, TransactionWork, TransactionalBackend};
use crate::error::{StoreError, StoreResult};
use crate::model::{Entity, FieldMap, FieldValue};
use log::{debug, error, info};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        StoreError::Backend(Box::new(value))
    }
}

/// Backend implementation over one SQLite connection.
///
/// The connection sits behind a mutex, so the backend can be shared by a
/// dispatcher serving concurrent readers; SQLite serializes the statements
/// themselves.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Wraps an already configured connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Opens a database file and applies connection bootstrap pragmas.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        info!("event=db_open module=backend_sqlite status=start mode=file");
        let conn = Connection::open(path)?;
        Self::bootstrap(conn)
    }

    /// Opens an in-memory database and applies connection bootstrap pragmas.
    pub fn open_in_memory() -> StoreResult<Self> {
        info!("event=db_open module=backend_sqlite status=start mode=memory");
        let conn = Connection::open_in_memory()?;
        Self::bootstrap(conn)
    }

    fn bootstrap(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        info!("event=db_open module=backend_sqlite status=ok");
        Ok(Self::new(conn))
    }

    /// Runs `f` against the raw connection; schema setup and migrations go
    /// through here.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut conn = self.lock_conn();
        f(&mut conn)
    }

    /// Executes a prepared [`SelectQuery`] and appends the matches.
    pub fn query(
        &self,
        proto: &dyn Entity,
        query: &SelectQuery,
        results: &mut Vec<Box<dyn Entity>>,
    ) -> StoreResult<()> {
        let conn = self.lock_conn();
        run_select(
            &conn,
            proto,
            results,
            query.order.as_ref(),
            query.offset,
            &query.condition,
            &query.args,
            query.limit.map_or(-1, |limit| limit as i64),
        )
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Backend for SqliteBackend {
    fn save(&self, item: &mut dyn Entity) -> StoreResult<()> {
        save_on(&self.lock_conn(), item)
    }

    fn load(&self, target: &mut dyn Entity, id: u64) -> StoreResult<()> {
        load_on(&self.lock_conn(), target, id)
    }

    fn delete(&self, item: &mut dyn Entity) -> StoreResult<()> {
        delete_on(&self.lock_conn(), item)
    }

    fn select(
        &self,
        proto: &dyn Entity,
        results: &mut Vec<Box<dyn Entity>>,
        order: Option<&Ordering>,
        skip: u64,
        condition: &str,
        args: &[FieldValue],
    ) -> StoreResult<()> {
        let limit = capacity_limit(results);
        run_select(
            &self.lock_conn(),
            proto,
            results,
            order,
            skip,
            condition,
            args,
            limit,
        )
    }

    fn as_transactional(&self) -> Option<&dyn TransactionalBackend> {
        Some(self)
    }
}

impl TransactionalBackend for SqliteBackend {
    fn transaction(&self, work: &mut TransactionWork<'_>) -> StoreResult<()> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;
        debug!("event=tx_begin module=backend_sqlite");
        let handle = TxHandle { conn: &tx };
        match work(&handle) {
            Ok(()) => {
                tx.commit()?;
                debug!("event=tx_commit module=backend_sqlite status=ok");
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    error!(
                        "event=tx_rollback module=backend_sqlite status=error error={rollback_err}"
                    );
                } else {
                    debug!("event=tx_rollback module=backend_sqlite status=ok");
                }
                Err(err)
            }
        }
    }
}

/// Backend view of the active transaction. Confined to the unit of work.
struct TxHandle<'a> {
    conn: &'a Connection,
}

impl Backend for TxHandle<'_> {
    fn save(&self, item: &mut dyn Entity) -> StoreResult<()> {
        save_on(self.conn, item)
    }

    fn load(&self, target: &mut dyn Entity, id: u64) -> StoreResult<()> {
        load_on(self.conn, target, id)
    }

    fn delete(&self, item: &mut dyn Entity) -> StoreResult<()> {
        delete_on(self.conn, item)
    }

    fn select(
        &self,
        proto: &dyn Entity,
        results: &mut Vec<Box<dyn Entity>>,
        order: Option<&Ordering>,
        skip: u64,
        condition: &str,
        args: &[FieldValue],
    ) -> StoreResult<()> {
        let limit = capacity_limit(results);
        run_select(self.conn, proto, results, order, skip, condition, args, limit)
    }
}

/// Reusable select statement description: condition with positional
/// arguments, composable ordering, explicit limit and offset.
#[derive(Default)]
pub struct SelectQuery {
    condition: String,
    args: Vec<FieldValue>,
    order: Option<Ordering>,
    limit: Option<u64>,
    offset: u64,
}

impl SelectQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the condition expression and its positional arguments.
    pub fn filter(mut self, condition: impl Into<String>, args: Vec<FieldValue>) -> Self {
        self.condition = condition.into();
        self.args = args;
        self
    }

    /// Appends an ordering term; earlier terms keep priority.
    pub fn order_by(
        mut self,
        field: impl Into<String>,
        direction: crate::backend::OrderDirection,
    ) -> Self {
        self.order = Some(match self.order.take() {
            Some(order) => order.then(field, direction),
            None => Ordering::by(field, direction),
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }
}

fn save_on(conn: &Connection, item: &mut dyn Entity) -> StoreResult<()> {
    if item.id() == 0 {
        insert_entry(conn, item)
    } else {
        update_entry(conn, item)
    }
}

fn insert_entry(conn: &Connection, item: &mut dyn Entity) -> StoreResult<()> {
    let fields = persisted_fields(item);
    let sql;
    let values: Vec<Value>;
    if fields.is_empty() {
        sql = format!("INSERT INTO {} DEFAULT VALUES", quoted(item.collection_name()));
        values = Vec::new();
    } else {
        let columns: Vec<String> = fields.keys().map(|name| quoted(name)).collect();
        let placeholders: Vec<&str> = fields.keys().map(|_| "?").collect();
        sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quoted(item.collection_name()),
            columns.join(", "),
            placeholders.join(", ")
        );
        values = fields.values().map(sql_value).collect();
    }
    log_sql(&sql, values.len());
    conn.execute(&sql, params_from_iter(values))?;
    let id = conn.last_insert_rowid();
    item.fill(id as u64, None);
    Ok(())
}

fn update_entry(conn: &Connection, item: &dyn Entity) -> StoreResult<()> {
    let fields = persisted_fields(item);
    let assignments: Vec<String> = fields.keys().map(|name| format!("{} = ?", quoted(name))).collect();
    let mut values: Vec<Value> = fields.values().map(sql_value).collect();
    values.push(Value::Integer(item.id() as i64));
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quoted(item.collection_name()),
        assignments.join(", "),
        quoted(item.pk_name())
    );
    log_sql(&sql, values.len());
    conn.execute(&sql, params_from_iter(values))?;
    Ok(())
}

fn load_on(conn: &Connection, target: &mut dyn Entity, id: u64) -> StoreResult<()> {
    let sql = format!(
        "SELECT * FROM {} WHERE {} = ? LIMIT 1",
        quoted(target.collection_name()),
        quoted(target.pk_name())
    );
    log_sql(&sql, 1);
    let mut stmt = conn.prepare(&sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    let mut rows = stmt.query([id as i64])?;
    match rows.next()? {
        Some(row) => {
            let (row_id, fields) = decode_row(row, &columns, target)?;
            target.fill(row_id, Some(fields));
            Ok(())
        }
        None => Err(StoreError::NotFound {
            collection: target.collection_name().to_string(),
            id,
        }),
    }
}

fn delete_on(conn: &Connection, item: &mut dyn Entity) -> StoreResult<()> {
    if item.id() == 0 {
        return Ok(());
    }
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?",
        quoted(item.collection_name()),
        quoted(item.pk_name())
    );
    log_sql(&sql, 1);
    conn.execute(&sql, [item.id() as i64])?;
    item.fill(0, None);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_select(
    conn: &Connection,
    proto: &dyn Entity,
    results: &mut Vec<Box<dyn Entity>>,
    order: Option<&Ordering>,
    skip: u64,
    condition: &str,
    args: &[FieldValue],
    limit: i64,
) -> StoreResult<()> {
    let mut sql = format!("SELECT * FROM {}", quoted(proto.collection_name()));
    let condition = condition.trim();
    sql.push_str(" WHERE ");
    sql.push_str(if condition.is_empty() { "1" } else { condition });
    if let Some(order) = order {
        sql.push_str(" ORDER BY ");
        sql.push_str(&render_ordering(order));
    }
    if limit >= 0 || skip > 0 {
        sql.push_str(&format!(" LIMIT {limit} OFFSET {skip}"));
    }
    log_sql(&sql, args.len());

    let mut stmt = conn.prepare(&sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    let values: Vec<Value> = args.iter().map(sql_value).collect();
    let mut rows = stmt.query(params_from_iter(values))?;
    while let Some(row) = rows.next()? {
        let mut clone = proto.clone_empty();
        let (id, fields) = decode_row(row, &columns, clone.as_ref())?;
        clone.fill(id, Some(fields));
        results.push(clone);
    }
    Ok(())
}

/// Implicit row limit: the capacity the caller pre-allocated, 0 = unlimited.
///
/// Captured before any push can grow the vector.
fn capacity_limit(results: &Vec<Box<dyn Entity>>) -> i64 {
    let capacity = results.capacity();
    if capacity == 0 {
        -1
    } else {
        capacity as i64
    }
}

fn decode_row(row: &Row<'_>, columns: &[String], target: &dyn Entity) -> StoreResult<(u64, FieldMap)> {
    let mut id = 0u64;
    let mut fields = FieldMap::new();
    for (index, column) in columns.iter().enumerate() {
        let value_ref = row.get_ref(index)?;
        if column == target.pk_name() {
            id = match value_ref {
                ValueRef::Integer(value) if value >= 0 => value as u64,
                other => {
                    return Err(StoreError::InvalidRow {
                        collection: target.collection_name().to_string(),
                        message: format!(
                            "primary key `{column}` holds a non-integer value ({})",
                            value_ref_kind(&other)
                        ),
                    })
                }
            };
            continue;
        }
        fields.insert(column.clone(), field_value_from(value_ref));
    }
    if let Some(structured) = target.as_structured() {
        fields = coerce_to_layout(fields, &structured.field_layout());
    }
    Ok((id, fields))
}

/// Restricts a decoded row to the declared layout, nudging values toward the
/// declared shapes where the conversion is lossless.
fn coerce_to_layout(mut decoded: FieldMap, layout: &FieldMap) -> FieldMap {
    let mut fields = FieldMap::new();
    for (name, declared) in layout {
        if let Some(value) = decoded.remove(name) {
            fields.insert(name.clone(), coerce_value(value, declared));
        }
    }
    fields
}

fn coerce_value(value: FieldValue, declared: &FieldValue) -> FieldValue {
    match (declared, &value) {
        (FieldValue::Integer(_), FieldValue::Text(text)) => text
            .parse::<i64>()
            .map(FieldValue::Integer)
            .unwrap_or(value),
        (FieldValue::Real(_), FieldValue::Integer(int)) => FieldValue::Real(*int as f64),
        (FieldValue::Real(_), FieldValue::Text(text)) => text
            .parse::<f64>()
            .map(FieldValue::Real)
            .unwrap_or(value),
        (FieldValue::Text(_), FieldValue::Integer(int)) => FieldValue::Text(int.to_string()),
        _ => value,
    }
}

/// Fields a write should carry: the declared layout for structured entities,
/// the full snapshot otherwise.
fn persisted_fields(item: &dyn Entity) -> FieldMap {
    match item.as_structured() {
        Some(structured) => {
            let layout = structured.field_layout();
            let mut snapshot = item.snapshot();
            let mut fields = FieldMap::new();
            for (name, default) in layout {
                let value = snapshot.remove(&name).unwrap_or(default);
                fields.insert(name, value);
            }
            fields
        }
        None => item.snapshot(),
    }
}

fn render_ordering(order: &Ordering) -> String {
    order
        .terms()
        .iter()
        .map(|(field, direction)| {
            let dir = match direction {
                crate::backend::OrderDirection::Asc => "ASC",
                crate::backend::OrderDirection::Desc => "DESC",
            };
            format!("{field} {dir}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn field_value_from(value: ValueRef<'_>) -> FieldValue {
    match value {
        ValueRef::Null => FieldValue::Null,
        ValueRef::Integer(int) => FieldValue::Integer(int),
        ValueRef::Real(real) => FieldValue::Real(real),
        ValueRef::Text(text) => FieldValue::Text(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => FieldValue::Blob(blob.to_vec()),
    }
}

fn value_ref_kind(value: &ValueRef<'_>) -> &'static str {
    match value {
        ValueRef::Null => "null",
        ValueRef::Integer(_) => "integer",
        ValueRef::Real(_) => "real",
        ValueRef::Text(_) => "text",
        ValueRef::Blob(_) => "blob",
    }
}

fn sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Integer(int) => Value::Integer(*int),
        FieldValue::Real(real) => Value::Real(*real),
        FieldValue::Text(text) => Value::Text(text.clone()),
        FieldValue::Blob(blob) => Value::Blob(blob.clone()),
    }
}

fn quoted(name: &str) -> String {
    format!("\"{name}\"")
}

fn log_sql(sql: &str, args: usize) {
    debug!("event=sql_exec module=backend_sqlite args={args} sql={sql}");
}
