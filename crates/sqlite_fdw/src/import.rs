//! IMPORT FOREIGN SCHEMA: host table definitions from the sqlite catalog.

use std::fmt::Write as _;
use std::path::Path;

use tracing::{debug, trace};

use crate::errors::{Result, SqliteFdwError};
use crate::options::ImportOptions;
use crate::quote::{quote_identifier, quote_literal, quote_sqlite_identifier};
use crate::sqlite::{OpenMode, SqliteConnection, SqliteStatement, Step};

/// The only schema names that mean anything for a single sqlite file.
const ALLOWED_SCHEMAS: &[&str] = &["public", "main"];

/// sqlite declared type name (lowercase) to host type name. Entries ending
/// in `*` match by prefix.
const TYPE_TRANSLATIONS: &[(&str, &str)] = &[
    ("tinyint", "smallint"),
    ("mediumint", "integer"),
    ("unsigned big int", "bigint"),
    ("double", "double precision"),
    ("datetime", "timestamp"),
    ("nvarchar text", "text"),
    ("longvarchar", "text"),
    ("text*", "text"),
    ("blob", "bytea"),
    // sqlite integers take up to 8 bytes.
    ("integer", "bigint"),
];

/// Translates a sqlite declared type to a host type name. Unknown types pass
/// through lowercased, an empty declared type imports as text.
pub fn translate_type(sqlite_type: &str) -> String {
    let lower = sqlite_type.to_lowercase();
    if lower.trim().is_empty() {
        return "text".to_string();
    }

    for (from, to) in TYPE_TRANSLATIONS {
        let matched = match from.strip_suffix('*') {
            Some(prefix) => lower.starts_with(prefix),
            None => lower == *from,
        };
        if matched {
            return to.to_string();
        }
    }
    lower
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportList {
    All,
    LimitTo(Vec<String>),
    Except(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSchemaStmt {
    pub remote_schema: String,
    pub local_schema: String,
    pub server_name: String,
    pub list: ImportList,
    pub options: ImportOptions,
}

fn tables_query(list: &ImportList) -> Result<String> {
    let mut sql =
        String::from("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'");
    let (negate, names) = match list {
        ImportList::All => return Ok(sql),
        ImportList::LimitTo(names) => ("", names),
        ImportList::Except(names) => ("NOT ", names),
    };
    let quoted: Vec<_> = names.iter().map(|n| format!("'{}'", n.replace('\'', "''"))).collect();
    write!(sql, " AND name {negate}IN ({})", quoted.join(", "))?;
    Ok(sql)
}

/// Lazily produces one `CREATE FOREIGN TABLE` statement per sqlite table.
///
/// Owns the connection for its whole life. The first error ends the
/// iteration.
#[derive(Debug)]
pub struct SchemaImport {
    conn: SqliteConnection,
    tables: Option<SqliteStatement>,
    stmt: ImportSchemaStmt,
}

impl SchemaImport {
    pub fn new(database: &Path, stmt: ImportSchemaStmt) -> Result<Self> {
        debug!(database = %database.display(), remote_schema = %stmt.remote_schema, "import foreign schema");

        if !ALLOWED_SCHEMAS.contains(&stmt.remote_schema.as_str()) {
            return Err(SqliteFdwError::SchemaNotFound(stmt.remote_schema));
        }

        let conn = SqliteConnection::open(database, OpenMode::ReadOnly)?;
        let query = tables_query(&stmt.list)?;
        trace!(?query, "listing tables");
        let tables = conn.prepare(&query)?;

        Ok(SchemaImport {
            conn,
            tables: Some(tables),
            stmt,
        })
    }

    fn next_table(&mut self) -> Result<Option<String>> {
        let Some(tables) = self.tables.as_mut() else {
            return Ok(None);
        };
        match tables.step()? {
            Step::Row => Ok(tables.column_text(0)),
            Step::Done => {
                self.tables = None;
                Ok(None)
            }
        }
    }

    fn create_table_stmt(&self, table: &str) -> Result<String> {
        let opts = self.stmt.options;
        let mut cols = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_sqlite_identifier(table)))?;

        let mut sql = String::new();
        writeln!(
            sql,
            "CREATE FOREIGN TABLE {}.{} (",
            quote_identifier(&self.stmt.local_schema),
            quote_identifier(table)
        )?;

        let mut first = true;
        while let Step::Row = cols.step()? {
            let name = cols.column_text(1).unwrap_or_default();
            let ty = cols.column_text(2).unwrap_or_default();
            let not_null = cols.column_int(3) == 1;
            let default = cols.column_text(4);

            if !first {
                sql.push_str(",\n");
            }
            first = false;

            write!(sql, "{} {}", quote_identifier(&name), translate_type(&ty))?;
            if not_null && opts.import_not_null {
                sql.push_str(" NOT NULL");
            }
            if let Some(default) = default.filter(|_| opts.import_default) {
                write!(sql, " DEFAULT {default}")?;
            }
        }

        write!(
            sql,
            "\n) SERVER {}\nOPTIONS (table {})",
            quote_identifier(&self.stmt.server_name),
            quote_literal(table)
        )?;
        Ok(sql)
    }
}

impl Iterator for SchemaImport {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self
            .next_table()
            .and_then(|table| table.map(|t| self.create_table_stmt(&t)).transpose());
        match result {
            Ok(Some(sql)) => Some(Ok(sql)),
            Ok(None) => None,
            Err(e) => {
                self.tables = None;
                Some(Err(e))
            }
        }
    }
}

/// Collects every table definition. Nothing is returned if any table fails.
pub fn import_foreign_schema(database: &Path, stmt: ImportSchemaStmt) -> Result<Vec<String>> {
    SchemaImport::new(database, stmt)?.collect()
}
