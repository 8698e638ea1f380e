//! Statements: SQL classification, bind and column metadata, cache keys.
//!
//! A statement is created on first execute. Its cache key is the SQL text
//! plus everything that changes the parsed shape: a RETURNING clause, array
//! DML, and the fetch type mapping in effect. Trailing statement
//! terminators are rejected outright; the server would reject them anyway
//! and silently stripping them would change what gets cached.

use crate::constants::{BindDirection, OraType};
use crate::error::{Error, Result};
use crate::row::NumberShape;

/// Statement classification from the leading SQL keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatementKind {
    /// SELECT / WITH
    Query,
    /// INSERT / UPDATE / DELETE / MERGE
    Dml,
    /// CREATE / ALTER / DROP / TRUNCATE / GRANT / REVOKE / ANALYZE / COMMENT
    Ddl,
    /// BEGIN / DECLARE / CALL
    Plsql,
    /// COMMIT / ROLLBACK or anything unrecognized
    #[default]
    Other,
}

/// Metadata for one bind position.
#[derive(Debug, Clone)]
pub struct BindInfo {
    /// Bind name without the leading colon, uppercased
    pub name: String,
    /// Wire data type
    pub ora_type: OraType,
    /// Direction
    pub direction: BindDirection,
    /// Buffer size in bytes for variable-size types
    pub max_size: u32,
    /// NUMBER precision
    pub precision: u8,
    /// NUMBER scale
    pub scale: i8,
    /// Element count for array binds, zero for scalars
    pub num_elements: u32,
    /// True for PL/SQL index-by table binds
    pub is_array: bool,
    /// Charset form for character data
    pub charset_form: u8,
    /// True when the bind belongs to a RETURNING INTO clause
    pub is_return_bind: bool,
}

impl BindInfo {
    /// An IN bind of the given type.
    pub fn input(name: impl Into<String>, ora_type: OraType, max_size: u32) -> Self {
        Self {
            name: name.into(),
            ora_type,
            direction: BindDirection::Input,
            max_size,
            precision: 0,
            scale: 0,
            num_elements: 0,
            is_array: false,
            charset_form: if ora_type.is_character() {
                crate::constants::csfrm::IMPLICIT
            } else {
                0
            },
            is_return_bind: false,
        }
    }

    /// An OUT bind of the given type.
    pub fn output(name: impl Into<String>, ora_type: OraType, max_size: u32) -> Self {
        let mut info = Self::input(name, ora_type, max_size);
        info.direction = BindDirection::Output;
        info
    }
}

/// Describe metadata for one select-list column.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Wire data type
    pub ora_type: OraType,
    /// Buffer size for variable-size types
    pub buffer_size: u32,
    /// Maximum length in characters for character columns
    pub max_size: u32,
    /// NUMBER precision
    pub precision: u8,
    /// NUMBER scale
    pub scale: i8,
    /// Column accepts NULL
    pub nullable: bool,
    /// Charset form
    pub charset_form: u8,
    /// Vector dimension count, when typed
    pub vector_dimensions: u32,
    /// Vector element format byte
    pub vector_format: u8,
    /// Object type OID for named types
    pub type_oid: Option<Vec<u8>>,
}

impl ColumnInfo {
    /// A bare column of the given type.
    pub fn new(name: impl Into<String>, ora_type: OraType) -> Self {
        Self {
            name: name.into(),
            ora_type,
            buffer_size: 0,
            max_size: 0,
            precision: 0,
            scale: 0,
            nullable: true,
            charset_form: if ora_type.is_character() {
                crate::constants::csfrm::IMPLICIT
            } else {
                0
            },
            vector_dimensions: 0,
            vector_format: 0,
            type_oid: None,
        }
    }
}

/// Key identifying a statement in the cache. Two executions share a cached
/// cursor only when every field matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatementKey {
    /// Verbatim SQL text
    pub sql: String,
    /// The statement carries a RETURNING INTO clause
    pub is_returning: bool,
    /// Executed with array DML
    pub array_dml: bool,
    /// NUMBER materialization in effect at describe time
    pub number_shape: NumberShapeKey,
}

/// Hashable mirror of [`NumberShape`] for the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum NumberShapeKey {
    Auto,
    Decimal,
    Double,
}

impl From<NumberShape> for NumberShapeKey {
    fn from(shape: NumberShape) -> Self {
        match shape {
            NumberShape::Auto => NumberShapeKey::Auto,
            NumberShape::Decimal => NumberShapeKey::Decimal,
            NumberShape::Double => NumberShapeKey::Double,
        }
    }
}

/// A parsed (or parseable) statement and its server-side cursor.
#[derive(Debug, Clone)]
pub struct Statement {
    sql: String,
    kind: StatementKind,
    cursor_id: u16,
    executed: bool,
    is_returning: bool,
    binds: Vec<BindInfo>,
    columns: Vec<ColumnInfo>,
    requires_define: bool,
    no_prefetch: bool,
    last_rowid: Option<crate::types::RowId>,
}

impl Statement {
    /// Build a statement from SQL text, rejecting trailing terminators.
    pub fn parse(sql: &str) -> Result<Self> {
        let trimmed = sql.trim_end();
        if trimmed.ends_with(';') || trimmed.ends_with('/') {
            return Err(Error::Interface(
                "statement text must not end with ';' or '/'".into(),
            ));
        }
        let kind = classify(sql);
        let is_returning = kind == StatementKind::Dml && has_returning_clause(sql);
        Ok(Self {
            sql: sql.to_string(),
            kind,
            cursor_id: 0,
            executed: false,
            is_returning,
            binds: Vec::new(),
            columns: Vec::new(),
            requires_define: false,
            no_prefetch: false,
            last_rowid: None,
        })
    }

    /// An empty statement representing an already-open ref cursor.
    pub fn for_ref_cursor(cursor_id: u16) -> Self {
        Self {
            sql: String::new(),
            kind: StatementKind::Query,
            cursor_id,
            executed: true,
            is_returning: false,
            binds: Vec::new(),
            columns: Vec::new(),
            requires_define: false,
            no_prefetch: false,
            last_rowid: None,
        }
    }

    /// The SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The classification.
    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    /// True for SELECT statements.
    pub fn is_query(&self) -> bool {
        self.kind == StatementKind::Query
    }

    /// True for DML.
    pub fn is_dml(&self) -> bool {
        self.kind == StatementKind::Dml
    }

    /// True for DDL.
    pub fn is_ddl(&self) -> bool {
        self.kind == StatementKind::Ddl
    }

    /// True for PL/SQL blocks and calls.
    pub fn is_plsql(&self) -> bool {
        self.kind == StatementKind::Plsql
    }

    /// True when a RETURNING INTO clause is present.
    pub fn is_returning(&self) -> bool {
        self.is_returning
    }

    /// The server cursor id, zero before the first parse.
    pub fn cursor_id(&self) -> u16 {
        self.cursor_id
    }

    /// Record the cursor id from an execute response.
    pub fn set_cursor_id(&mut self, id: u16) {
        self.cursor_id = id;
    }

    /// Whether the statement has been executed on its cursor.
    pub fn executed(&self) -> bool {
        self.executed
    }

    /// Mark execution state.
    pub fn set_executed(&mut self, executed: bool) {
        self.executed = executed;
    }

    /// Bind metadata in positional order.
    pub fn binds(&self) -> &[BindInfo] {
        &self.binds
    }

    /// Replace bind metadata.
    pub fn set_binds(&mut self, binds: Vec<BindInfo>) {
        self.binds = binds;
    }

    /// Describe metadata, empty before the first describe.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Adopt describe metadata, deriving the prefetch policy from the
    /// column types.
    pub fn set_columns(&mut self, columns: Vec<ColumnInfo>) {
        self.no_prefetch = columns.iter().any(|c| c.ora_type.defeats_prefetch());
        self.columns = columns;
    }

    /// Whether the next execute must send column defines (LOB-bearing
    /// selects re-executed against a cached cursor).
    pub fn requires_define(&self) -> bool {
        self.requires_define
    }

    /// Set the define requirement.
    pub fn set_requires_define(&mut self, required: bool) {
        self.requires_define = required;
    }

    /// True when prefetch must be disabled for this statement.
    pub fn no_prefetch(&self) -> bool {
        self.no_prefetch
    }

    /// Rowid of the last affected row.
    pub fn last_rowid(&self) -> Option<&crate::types::RowId> {
        self.last_rowid.as_ref()
    }

    /// Record the rowid reported by the server.
    pub fn set_last_rowid(&mut self, rowid: Option<crate::types::RowId>) {
        self.last_rowid = rowid;
    }

    /// The cache key for this statement under the given execution options.
    pub fn cache_key(&self, array_dml: bool, number_shape: NumberShape) -> StatementKey {
        StatementKey {
            sql: self.sql.clone(),
            is_returning: self.is_returning,
            array_dml,
            number_shape: number_shape.into(),
        }
    }

    /// Reset server-side state, keeping the parsed metadata. Used when a
    /// cached cursor is invalidated and the statement must reparse.
    pub fn invalidate_cursor(&mut self) {
        self.cursor_id = 0;
        self.executed = false;
    }
}

fn classify(sql: &str) -> StatementKind {
    let mut words = sql
        .split_whitespace()
        .map(|w| w.trim_start_matches('('))
        .filter(|w| !w.is_empty());
    let first = match words.next() {
        Some(w) => w.to_ascii_uppercase(),
        None => return StatementKind::Other,
    };
    match first.as_str() {
        "SELECT" | "WITH" => StatementKind::Query,
        "INSERT" | "UPDATE" | "DELETE" | "MERGE" => StatementKind::Dml,
        "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "GRANT" | "REVOKE" | "ANALYZE" | "COMMENT" => {
            StatementKind::Ddl
        }
        "BEGIN" | "DECLARE" | "CALL" => StatementKind::Plsql,
        _ => StatementKind::Other,
    }
}

/// Detect a RETURNING ... INTO clause outside of string literals.
fn has_returning_clause(sql: &str) -> bool {
    let upper = sql.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_literal = !in_literal,
            b'R' | b'r' if !in_literal => {
                if upper[i..].starts_with("RETURNING")
                    && (i == 0 || !bytes[i - 1].is_ascii_alphanumeric())
                {
                    let rest = &upper[i + "RETURNING".len()..];
                    if rest
                        .split_whitespace()
                        .any(|w| w == "INTO")
                    {
                        return true;
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(Statement::parse("SELECT 1 FROM DUAL").unwrap().kind(), StatementKind::Query);
        assert_eq!(
            Statement::parse("with x as (select 1 from dual) select * from x")
                .unwrap()
                .kind(),
            StatementKind::Query
        );
        assert_eq!(
            Statement::parse("INSERT INTO t VALUES (:1)").unwrap().kind(),
            StatementKind::Dml
        );
        assert_eq!(
            Statement::parse("create table t (x number)").unwrap().kind(),
            StatementKind::Ddl
        );
        assert_eq!(
            Statement::parse("BEGIN NULL; END").unwrap().kind(),
            StatementKind::Plsql
        );
        assert_eq!(
            Statement::parse("COMMIT WORK").unwrap().kind(),
            StatementKind::Other
        );
    }

    #[test]
    fn trailing_terminator_rejected() {
        assert!(matches!(
            Statement::parse("SELECT 1 FROM DUAL;"),
            Err(Error::Interface(_))
        ));
        assert!(matches!(
            Statement::parse("SELECT 1 FROM DUAL;  "),
            Err(Error::Interface(_))
        ));
        assert!(matches!(
            Statement::parse("BEGIN NULL; END;\n/"),
            Err(Error::Interface(_))
        ));
    }

    #[test]
    fn semicolons_inside_plsql_are_fine() {
        assert!(Statement::parse("BEGIN NULL; END").is_ok());
    }

    #[test]
    fn returning_detection() {
        let stmt =
            Statement::parse("DELETE FROM c WHERE p = :1 RETURNING id INTO :2").unwrap();
        assert!(stmt.is_returning());

        let stmt = Statement::parse("UPDATE t SET x = 'RETURNING INTO'").unwrap();
        assert!(!stmt.is_returning());

        let stmt = Statement::parse("SELECT returning_col FROM t").unwrap();
        assert!(!stmt.is_returning());
    }

    #[test]
    fn cache_key_separates_variants() {
        let stmt = Statement::parse("SELECT x FROM t").unwrap();
        let a = stmt.cache_key(false, NumberShape::Auto);
        let b = stmt.cache_key(false, NumberShape::Decimal);
        let c = stmt.cache_key(true, NumberShape::Auto);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, stmt.cache_key(false, NumberShape::Auto));
    }

    #[test]
    fn lob_columns_disable_prefetch() {
        let mut stmt = Statement::parse("SELECT c FROM t").unwrap();
        stmt.set_columns(vec![ColumnInfo::new("C", OraType::Clob)]);
        assert!(stmt.no_prefetch());

        stmt.set_columns(vec![ColumnInfo::new("C", OraType::Varchar)]);
        assert!(!stmt.no_prefetch());
    }

    #[test]
    fn cursor_invalidation() {
        let mut stmt = Statement::parse("SELECT 1 FROM DUAL").unwrap();
        stmt.set_cursor_id(42);
        stmt.set_executed(true);
        stmt.invalidate_cursor();
        assert_eq!(stmt.cursor_id(), 0);
        assert!(!stmt.executed());
    }
}
