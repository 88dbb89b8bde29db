use std::ffi::{CStr, CString, c_int};
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::rc::Rc;

use rusqlite::ffi;
use rusqlite::types::Value;
use tracing::{debug, trace};

use crate::errors::{Result, SqliteFdwError, internal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

impl OpenMode {
    fn flags(self) -> c_int {
        match self {
            OpenMode::ReadOnly => ffi::SQLITE_OPEN_READONLY,
            OpenMode::ReadWrite => ffi::SQLITE_OPEN_READWRITE,
        }
    }
}

// libsqlite3-sys omits sqlite3_close_v2 from its bundled bindings; the
// symbol is still compiled into the bundled library.
unsafe extern "C" {
    fn sqlite3_close_v2(db: *mut ffi::sqlite3) -> c_int;
}

struct RawDb(NonNull<ffi::sqlite3>);

impl Drop for RawDb {
    fn drop(&mut self) {
        // close_v2 defers the close if a statement is somehow still alive.
        unsafe {
            sqlite3_close_v2(self.0.as_ptr());
        }
    }
}

/// An open sqlite database handle. Closed when the last clone (including
/// the ones held by statements) is dropped.
#[derive(Clone)]
pub struct SqliteConnection {
    path: PathBuf,
    db: Rc<RawDb>,
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SqliteConnection({})", self.path.to_string_lossy())
    }
}

impl SqliteConnection {
    /// Opens an existing database file. Never creates one.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), ?mode, "opening sqlite database");

        let c_path = CString::new(path.to_string_lossy().as_bytes()).map_err(|_| {
            SqliteFdwError::OpenFailed {
                path: path.clone(),
                message: "path contains a nul byte".to_string(),
            }
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, mode.flags(), ptr::null()) };

        match NonNull::new(db) {
            Some(handle) => {
                let raw = RawDb(handle);
                if rc != ffi::SQLITE_OK {
                    let message = unsafe { errmsg_of(handle.as_ptr()) };
                    // raw drops here, closing the half opened handle.
                    drop(raw);
                    return Err(SqliteFdwError::OpenFailed { path, message });
                }
                Ok(SqliteConnection {
                    path,
                    db: Rc::new(raw),
                })
            }
            None => Err(SqliteFdwError::OpenFailed {
                path,
                message: errstr(rc),
            }),
        }
    }

    pub fn errmsg(&self) -> String {
        unsafe { errmsg_of(self.db.0.as_ptr()) }
    }

    /// Rows changed by the most recent INSERT, UPDATE or DELETE.
    pub fn changes(&self) -> i64 {
        unsafe { ffi::sqlite3_changes(self.db.0.as_ptr()) as i64 }
    }

    pub fn prepare(&self, sql: &str) -> Result<SqliteStatement> {
        trace!(%sql, "preparing sqlite statement");

        let c_sql =
            CString::new(sql).map_err(|_| SqliteFdwError::PrepareFailed("query contains a nul byte".to_string()))?;
        let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                self.db.0.as_ptr(),
                c_sql.as_ptr(),
                -1,
                &mut stmt,
                ptr::null_mut(),
            )
        };

        if rc != ffi::SQLITE_OK {
            if !stmt.is_null() {
                unsafe {
                    ffi::sqlite3_finalize(stmt);
                }
            }
            return Err(SqliteFdwError::PrepareFailed(self.errmsg()));
        }

        // A null statement with SQLITE_OK means the text held no statement.
        let stmt = NonNull::new(stmt)
            .ok_or_else(|| SqliteFdwError::PrepareFailed(format!("empty query: {sql}")))?;

        Ok(SqliteStatement {
            conn: self.clone(),
            stmt,
            sql: sql.to_string(),
        })
    }
}

unsafe fn errmsg_of(db: *mut ffi::sqlite3) -> String {
    let msg = unsafe { ffi::sqlite3_errmsg(db) };
    if msg.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
}

fn errstr(rc: c_int) -> String {
    let msg = unsafe { ffi::sqlite3_errstr(rc) };
    if msg.is_null() {
        return format!("sqlite error code {rc}");
    }
    unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
}

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Row,
    Done,
}

/// A prepared statement. Finalized on drop, before its share of the
/// connection is released.
pub struct SqliteStatement {
    conn: SqliteConnection,
    stmt: NonNull<ffi::sqlite3_stmt>,
    sql: String,
}

impl fmt::Debug for SqliteStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStatement")
            .field("conn", &self.conn)
            .field("sql", &self.sql)
            .finish()
    }
}

impl Drop for SqliteStatement {
    fn drop(&mut self) {
        unsafe {
            ffi::sqlite3_finalize(self.stmt.as_ptr());
        }
    }
}

impl SqliteStatement {
    pub fn connection(&self) -> &SqliteConnection {
        &self.conn
    }

    pub fn step(&mut self) -> Result<Step> {
        match unsafe { ffi::sqlite3_step(self.stmt.as_ptr()) } {
            ffi::SQLITE_ROW => Ok(Step::Row),
            ffi::SQLITE_DONE => Ok(Step::Done),
            _ => Err(SqliteFdwError::StepFailed(self.conn.errmsg())),
        }
    }

    /// Rewinds the statement. Bindings are kept.
    pub fn reset(&mut self) -> Result<()> {
        let rc = unsafe { ffi::sqlite3_reset(self.stmt.as_ptr()) };
        if rc != ffi::SQLITE_OK {
            return Err(SqliteFdwError::StepFailed(self.conn.errmsg()));
        }
        Ok(())
    }

    pub fn clear_bindings(&mut self) {
        unsafe {
            ffi::sqlite3_clear_bindings(self.stmt.as_ptr());
        }
    }

    pub fn column_count(&self) -> usize {
        unsafe { ffi::sqlite3_column_count(self.stmt.as_ptr()) as usize }
    }

    pub fn parameter_count(&self) -> usize {
        unsafe { ffi::sqlite3_bind_parameter_count(self.stmt.as_ptr()) as usize }
    }

    /// Value of a column of the current row, in its sqlite storage class.
    pub fn column_value(&self, idx: usize) -> Value {
        let stmt = self.stmt.as_ptr();
        let col = idx as c_int;
        unsafe {
            match ffi::sqlite3_column_type(stmt, col) {
                ffi::SQLITE_INTEGER => Value::Integer(ffi::sqlite3_column_int64(stmt, col)),
                ffi::SQLITE_FLOAT => Value::Real(ffi::sqlite3_column_double(stmt, col)),
                ffi::SQLITE_TEXT => {
                    let text = ffi::sqlite3_column_text(stmt, col);
                    let len = ffi::sqlite3_column_bytes(stmt, col) as usize;
                    if text.is_null() {
                        Value::Text(String::new())
                    } else {
                        let bytes = std::slice::from_raw_parts(text, len);
                        Value::Text(String::from_utf8_lossy(bytes).into_owned())
                    }
                }
                ffi::SQLITE_BLOB => {
                    let blob = ffi::sqlite3_column_blob(stmt, col);
                    let len = ffi::sqlite3_column_bytes(stmt, col) as usize;
                    if blob.is_null() {
                        Value::Blob(Vec::new())
                    } else {
                        Value::Blob(std::slice::from_raw_parts(blob as *const u8, len).to_vec())
                    }
                }
                _ => Value::Null,
            }
        }
    }

    /// Text of a column, `None` for NULL.
    pub fn column_text(&self, idx: usize) -> Option<String> {
        match self.column_value(idx) {
            Value::Null => None,
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(r) => Some(r.to_string()),
            Value::Text(t) => Some(t),
            Value::Blob(b) => Some(String::from_utf8_lossy(&b).into_owned()),
        }
    }

    pub fn column_int(&self, idx: usize) -> i64 {
        unsafe { ffi::sqlite3_column_int64(self.stmt.as_ptr(), idx as c_int) }
    }

    /// Planner estimate of the rows the outermost loop produces.
    #[cfg(feature = "scanstatus")]
    pub fn scan_estimate(&self) -> Result<f64> {
        const SQLITE_SCANSTAT_EST: c_int = 2;

        unsafe extern "C" {
            fn sqlite3_stmt_scanstatus(
                stmt: *mut ffi::sqlite3_stmt,
                idx: c_int,
                op: c_int,
                out: *mut std::ffi::c_void,
            ) -> c_int;
        }

        let mut rows: f64 = 0.0;
        let rc = unsafe {
            sqlite3_stmt_scanstatus(
                self.stmt.as_ptr(),
                0,
                SQLITE_SCANSTAT_EST,
                (&mut rows as *mut f64).cast(),
            )
        };
        if rc != 0 {
            return Err(SqliteFdwError::EstimateFailed(format!(
                "no scan status for query: {}",
                self.sql
            )));
        }
        Ok(rows)
    }

    #[cfg(not(feature = "scanstatus"))]
    pub fn scan_estimate(&self) -> Result<f64> {
        Err(SqliteFdwError::EstimateFailed(
            "sqlite was built without scan status support".to_string(),
        ))
    }

    fn check_bind(&self, rc: c_int) -> Result<()> {
        if rc != ffi::SQLITE_OK {
            return Err(SqliteFdwError::BindFailed(self.conn.errmsg()));
        }
        Ok(())
    }
}

/// Receiver of positional parameter values. Indexes are one-based.
pub trait ParamTarget {
    fn bind_null(&mut self, idx: usize) -> Result<()>;
    fn bind_int(&mut self, idx: usize, v: i32) -> Result<()>;
    fn bind_int64(&mut self, idx: usize, v: i64) -> Result<()>;
    fn bind_double(&mut self, idx: usize, v: f64) -> Result<()>;
    fn bind_text(&mut self, idx: usize, v: &str) -> Result<()>;
    fn bind_blob(&mut self, idx: usize, v: &[u8]) -> Result<()>;
}

fn bind_index(idx: usize) -> Result<c_int> {
    c_int::try_from(idx).map_err(|_| internal!("parameter index {idx} out of range"))
}

fn bind_len(len: usize) -> Result<c_int> {
    c_int::try_from(len).map_err(|_| SqliteFdwError::BindFailed(format!("value of {len} bytes is too large")))
}

impl ParamTarget for SqliteStatement {
    fn bind_null(&mut self, idx: usize) -> Result<()> {
        let rc = unsafe { ffi::sqlite3_bind_null(self.stmt.as_ptr(), bind_index(idx)?) };
        self.check_bind(rc)
    }

    fn bind_int(&mut self, idx: usize, v: i32) -> Result<()> {
        let rc = unsafe { ffi::sqlite3_bind_int(self.stmt.as_ptr(), bind_index(idx)?, v) };
        self.check_bind(rc)
    }

    fn bind_int64(&mut self, idx: usize, v: i64) -> Result<()> {
        let rc = unsafe { ffi::sqlite3_bind_int64(self.stmt.as_ptr(), bind_index(idx)?, v) };
        self.check_bind(rc)
    }

    fn bind_double(&mut self, idx: usize, v: f64) -> Result<()> {
        let rc = unsafe { ffi::sqlite3_bind_double(self.stmt.as_ptr(), bind_index(idx)?, v) };
        self.check_bind(rc)
    }

    fn bind_text(&mut self, idx: usize, v: &str) -> Result<()> {
        let rc = unsafe {
            ffi::sqlite3_bind_text(
                self.stmt.as_ptr(),
                bind_index(idx)?,
                v.as_ptr().cast(),
                bind_len(v.len())?,
                ffi::SQLITE_TRANSIENT(),
            )
        };
        self.check_bind(rc)
    }

    fn bind_blob(&mut self, idx: usize, v: &[u8]) -> Result<()> {
        let rc = unsafe {
            ffi::sqlite3_bind_blob(
                self.stmt.as_ptr(),
                bind_index(idx)?,
                v.as_ptr().cast(),
                bind_len(v.len())?,
                ffi::SQLITE_TRANSIENT(),
            )
        };
        self.check_bind(rc)
    }
}

/// The current result row of a query.
pub trait ResultRow {
    fn num_columns(&self) -> usize;
    fn value(&self, idx: usize) -> Value;
}

impl ResultRow for SqliteStatement {
    fn num_columns(&self) -> usize {
        self.column_count()
    }

    fn value(&self, idx: usize) -> Value {
        self.column_value(idx)
    }
}

impl ResultRow for [Value] {
    fn num_columns(&self) -> usize {
        self.len()
    }

    fn value(&self, idx: usize) -> Value {
        self.get(idx).cloned().unwrap_or(Value::Null)
    }
}
