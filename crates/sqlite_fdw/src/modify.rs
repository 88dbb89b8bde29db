//! INSERT, UPDATE and DELETE against the sqlite table.
//!
//! Rows are addressed by sqlite's `rowid`. The scan feeding an UPDATE or
//! DELETE selects it as a trailing column named [`ROWID_JUNK_COLUMN`] and
//! hands it out with each row.

use pgrepr::scalar::Scalar;
use pgrepr::types::PgType;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::bind::{ParamValue, bind_params};
use crate::errors::{Result, SqliteFdwError, internal};
use crate::host::{AttrNumber, TableDesc};
use crate::options::TableSource;
use crate::quote::quote_sqlite_identifier;
use crate::sqlite::{OpenMode, SqliteConnection, SqliteStatement, Step};

/// Name of the junk column carrying the sqlite rowid.
pub const ROWID_JUNK_COLUMN: &str = "rowid";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteMutation {
    Insert { target_attrs: Vec<AttrNumber> },
    Update { target_attrs: Vec<AttrNumber> },
    Delete,
}

impl RemoteMutation {
    pub fn target_attrs(&self) -> &[AttrNumber] {
        match self {
            RemoteMutation::Insert { target_attrs } | RemoteMutation::Update { target_attrs } => {
                target_attrs
            }
            RemoteMutation::Delete => &[],
        }
    }

    /// Whether the statement addresses an existing row by rowid.
    pub fn needs_rowid(&self) -> bool {
        !matches!(self, RemoteMutation::Insert { .. })
    }

    /// Builds the parameterized DML. Target columns bind to `?1..?N` in
    /// order, the rowid (if any) to `?N+1`.
    pub fn build_sql(&self, table: &TableDesc, remote_table: &str) -> Result<String> {
        let names = self
            .target_attrs()
            .iter()
            .map(|attnum| {
                table
                    .column(*attnum)
                    .map(|c| quote_sqlite_identifier(&c.name))
                    .ok_or(SqliteFdwError::UnknownAttribute(*attnum))
            })
            .collect::<Result<Vec<_>>>()?;
        let table_name = quote_sqlite_identifier(remote_table);

        let sql = match self {
            RemoteMutation::Insert { .. } if names.is_empty() => {
                format!("INSERT INTO {table_name} DEFAULT VALUES")
            }
            RemoteMutation::Insert { .. } => {
                let placeholders: Vec<_> = (1..=names.len()).map(|i| format!("?{i}")).collect();
                format!(
                    "INSERT INTO {table_name} ({}) VALUES ({})",
                    names.join(", "),
                    placeholders.join(", ")
                )
            }
            RemoteMutation::Update { .. } if names.is_empty() => {
                return Err(internal!("update of {remote_table} without target columns"));
            }
            RemoteMutation::Update { .. } => {
                let sets: Vec<_> = names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| format!("{name} = ?{}", i + 1))
                    .collect();
                format!(
                    "UPDATE {table_name} SET {} WHERE rowid = ?{}",
                    sets.join(", "),
                    names.len() + 1
                )
            }
            RemoteMutation::Delete => format!("DELETE FROM {table_name} WHERE rowid = ?1"),
        };

        Ok(sql)
    }
}

/// Private plan data of a modification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyPlan {
    pub mutation: RemoteMutation,
    pub query: String,
}

impl ModifyPlan {
    pub fn to_fdw_private(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_fdw_private(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

pub fn plan_foreign_modify(
    table: &TableDesc,
    source: &TableSource,
    mutation: RemoteMutation,
) -> Result<ModifyPlan> {
    debug!(table = %table, ?mutation, "plan foreign modify");
    let query = mutation.build_sql(table, &source.table)?;
    trace!(?query, "remote dml");
    Ok(ModifyPlan { mutation, query })
}

#[derive(Debug)]
enum ModifyState {
    Planned,
    Began(SqliteStatement),
    Ended,
}

#[derive(Debug)]
pub struct ForeignModify {
    plan: ModifyPlan,
    source: TableSource,
    /// Position in the host row and declared type of each target column.
    targets: Vec<(usize, PgType)>,
    state: ModifyState,
}

impl ForeignModify {
    pub fn new(plan: ModifyPlan, table: &TableDesc, source: TableSource) -> Result<Self> {
        let targets = plan
            .mutation
            .target_attrs()
            .iter()
            .map(|attnum| {
                table
                    .columns
                    .iter()
                    .position(|c| c.attnum == *attnum)
                    .map(|idx| (idx, table.columns[idx].ty.clone()))
                    .ok_or(SqliteFdwError::UnknownAttribute(*attnum))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ForeignModify {
            plan,
            source,
            targets,
            state: ModifyState::Planned,
        })
    }

    pub fn query(&self) -> &str {
        &self.plan.query
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ModifyState::Began(_))
    }

    pub fn is_ended(&self) -> bool {
        matches!(self.state, ModifyState::Ended)
    }

    pub fn begin(&mut self, explain_only: bool) -> Result<()> {
        debug!(query = %self.plan.query, explain_only, "begin foreign modify");

        if !matches!(self.state, ModifyState::Planned) {
            return Err(internal!("begin called on a modify that already began"));
        }
        if explain_only {
            return Ok(());
        }

        let opened = SqliteConnection::open(&self.source.database, OpenMode::ReadWrite)
            .and_then(|conn| conn.prepare(&self.plan.query));
        match opened {
            Ok(stmt) => {
                self.state = ModifyState::Began(stmt);
                Ok(())
            }
            Err(e) => {
                self.state = ModifyState::Ended;
                Err(e)
            }
        }
    }

    /// Inserts one row. `row` holds every column of the host table in
    /// attribute order.
    pub fn exec_insert(&mut self, row: Vec<Scalar>) -> Result<Option<Vec<Scalar>>> {
        debug!("exec foreign insert");
        self.expect_mutation(|m| matches!(m, RemoteMutation::Insert { .. }))?;
        let params = self.target_params(&row)?;
        let changed = self.execute(&params)?;
        Ok((changed > 0).then_some(row))
    }

    pub fn exec_update(&mut self, rowid: i64, row: Vec<Scalar>) -> Result<Option<Vec<Scalar>>> {
        debug!(rowid, "exec foreign update");
        self.expect_mutation(|m| matches!(m, RemoteMutation::Update { .. }))?;
        let mut params = self.target_params(&row)?;
        params.push(ParamValue {
            index: params.len() + 1,
            ty: PgType::INT8,
            value: Scalar::Int8(rowid),
        });
        let changed = self.execute(&params)?;
        Ok((changed > 0).then_some(row))
    }

    pub fn exec_delete(&mut self, rowid: i64, row: Vec<Scalar>) -> Result<Option<Vec<Scalar>>> {
        debug!(rowid, "exec foreign delete");
        self.expect_mutation(|m| matches!(m, RemoteMutation::Delete))?;
        let params = [ParamValue {
            index: 1,
            ty: PgType::INT8,
            value: Scalar::Int8(rowid),
        }];
        let changed = self.execute(&params)?;
        Ok((changed > 0).then_some(row))
    }

    pub fn end(&mut self) {
        debug!("end foreign modify");
        self.state = ModifyState::Ended;
    }

    /// EXPLAIN output for the modification.
    pub fn explain(&self, verbose: bool) -> Vec<(String, String)> {
        if verbose {
            vec![("sqlite statement".to_string(), self.plan.query.clone())]
        } else {
            Vec::new()
        }
    }

    fn expect_mutation(&self, f: impl Fn(&RemoteMutation) -> bool) -> Result<()> {
        if f(&self.plan.mutation) {
            Ok(())
        } else {
            Err(internal!(
                "operation does not match planned mutation {:?}",
                self.plan.mutation
            ))
        }
    }

    fn target_params(&self, row: &[Scalar]) -> Result<Vec<ParamValue>> {
        self.targets
            .iter()
            .enumerate()
            .map(|(i, (col_idx, ty))| {
                let value = row
                    .get(*col_idx)
                    .cloned()
                    .ok_or_else(|| internal!("row has no value for column {col_idx}"))?;
                Ok(ParamValue {
                    index: i + 1,
                    ty: ty.clone(),
                    value,
                })
            })
            .collect()
    }

    /// Binds, runs the statement to completion and rewinds it. Returns the
    /// number of changed rows.
    fn execute(&mut self, params: &[ParamValue]) -> Result<i64> {
        let mut stmt = match std::mem::replace(&mut self.state, ModifyState::Ended) {
            ModifyState::Began(stmt) => stmt,
            other => {
                self.state = other;
                return Err(internal!("modify is not running"));
            }
        };

        // On error the statement drops here and the modify stays ended.
        bind_params(&mut stmt, params)?;
        while let Step::Row = stmt.step()? {}
        let changed = stmt.connection().changes();
        stmt.reset()?;
        trace!(changed, "remote dml done");

        self.state = ModifyState::Began(stmt);
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::errors::ErrorKind;
    use crate::options::ConversionPolicy;
    use crate::planner::test_util::items_table;

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modify.db");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE items (id INTEGER NOT NULL, name TEXT, price DOUBLE);
             INSERT INTO items VALUES (1, 'apple', 5.0), (2, 'pear', 12.5);",
        )
        .unwrap();
        (dir, path)
    }

    fn source(path: &PathBuf) -> TableSource {
        TableSource {
            database: path.clone(),
            table: "items".to_string(),
            on_conversion_error: ConversionPolicy::Error,
        }
    }

    fn query_all(path: &PathBuf) -> Vec<(i64, Option<String>, Option<f64>)> {
        let conn = rusqlite::Connection::open(path).unwrap();
        let mut stmt = conn
            .prepare("SELECT id, name, price FROM items ORDER BY id")
            .unwrap();
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn dml_shapes() {
        let table = items_table();

        let sql = RemoteMutation::Insert {
            target_attrs: vec![1, 3],
        }
        .build_sql(&table, "items")
        .unwrap();
        assert_eq!(sql, "INSERT INTO \"items\" (\"id\", \"price\") VALUES (?1, ?2)");

        let sql = RemoteMutation::Insert {
            target_attrs: vec![],
        }
        .build_sql(&table, "items")
        .unwrap();
        assert_eq!(sql, "INSERT INTO \"items\" DEFAULT VALUES");

        let sql = RemoteMutation::Update {
            target_attrs: vec![2, 3],
        }
        .build_sql(&table, "items")
        .unwrap();
        assert_eq!(
            sql,
            "UPDATE \"items\" SET \"name\" = ?1, \"price\" = ?2 WHERE rowid = ?3"
        );

        let sql = RemoteMutation::Delete.build_sql(&table, "items").unwrap();
        assert_eq!(sql, "DELETE FROM \"items\" WHERE rowid = ?1");

        let err = RemoteMutation::Update {
            target_attrs: vec![7],
        }
        .build_sql(&table, "items")
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LookupCorruption);
    }

    #[test]
    fn plan_roundtrips_through_fdw_private() {
        let (_dir, path) = fixture();
        let plan = plan_foreign_modify(
            &items_table(),
            &source(&path),
            RemoteMutation::Update {
                target_attrs: vec![3],
            },
        )
        .unwrap();
        let decoded = ModifyPlan::from_fdw_private(&plan.to_fdw_private().unwrap()).unwrap();
        assert_eq!(decoded, plan);
    }

    #[test]
    fn insert_update_delete() {
        let (_dir, path) = fixture();
        let table = items_table();
        let src = source(&path);

        let plan = plan_foreign_modify(
            &table,
            &src,
            RemoteMutation::Insert {
                target_attrs: vec![1, 2, 3],
            },
        )
        .unwrap();
        let mut insert = ForeignModify::new(plan, &table, src.clone()).unwrap();
        insert.begin(false).unwrap();
        for (id, name) in [(3, "plum"), (4, "fig")] {
            let row = vec![
                Scalar::Int8(id),
                Scalar::Text(name.to_string()),
                Scalar::Null,
            ];
            assert_eq!(insert.exec_insert(row.clone()).unwrap(), Some(row));
        }
        insert.end();

        let plan = plan_foreign_modify(
            &table,
            &src,
            RemoteMutation::Update {
                target_attrs: vec![3],
            },
        )
        .unwrap();
        let mut update = ForeignModify::new(plan, &table, src.clone()).unwrap();
        update.begin(false).unwrap();
        let row = vec![Scalar::Null, Scalar::Null, Scalar::Float8(99.0)];
        // rowid 1 holds id 1.
        assert!(update.exec_update(1, row.clone()).unwrap().is_some());
        assert!(update.exec_update(1000, row).unwrap().is_none());
        update.end();

        let plan = plan_foreign_modify(&table, &src, RemoteMutation::Delete).unwrap();
        let mut delete = ForeignModify::new(plan, &table, src).unwrap();
        delete.begin(false).unwrap();
        assert!(delete.exec_delete(2, vec![]).unwrap().is_some());
        assert!(delete.exec_delete(2, vec![]).unwrap().is_none());
        delete.end();

        assert_eq!(
            query_all(&path),
            vec![
                (1, Some("apple".to_string()), Some(99.0)),
                (3, Some("plum".to_string()), None),
                (4, Some("fig".to_string()), None),
            ]
        );
    }

    #[test]
    fn failed_exec_tears_down() {
        let (_dir, path) = fixture();
        let table = items_table();
        let src = source(&path);

        let plan = plan_foreign_modify(
            &table,
            &src,
            RemoteMutation::Insert {
                target_attrs: vec![1],
            },
        )
        .unwrap();
        let mut insert = ForeignModify::new(plan, &table, src).unwrap();
        insert.begin(false).unwrap();

        let err = insert
            .exec_insert(vec![Scalar::Text("x".to_string()), Scalar::Null, Scalar::Null])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert!(insert.is_ended());

        let err = insert
            .exec_insert(vec![Scalar::Int8(1), Scalar::Null, Scalar::Null])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn explain_only_never_opens() {
        let table = items_table();
        let src = source(&PathBuf::from("/does/not/exist.db"));
        let plan = plan_foreign_modify(&table, &src, RemoteMutation::Delete).unwrap();
        let mut delete = ForeignModify::new(plan, &table, src).unwrap();
        delete.begin(true).unwrap();
        assert!(!delete.is_active());
        assert_eq!(delete.explain(true).len(), 1);
        delete.end();
        delete.end();
    }

    #[test]
    fn wrong_operation() {
        let (_dir, path) = fixture();
        let table = items_table();
        let src = source(&path);
        let plan = plan_foreign_modify(&table, &src, RemoteMutation::Delete).unwrap();
        let mut delete = ForeignModify::new(plan, &table, src).unwrap();
        delete.begin(false).unwrap();
        assert!(delete.exec_insert(vec![]).is_err());
        assert!(delete.is_active());
    }
}
