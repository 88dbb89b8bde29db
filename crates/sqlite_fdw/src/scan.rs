//! Execution state of a foreign scan.
//!
//! ```text
//! Planned --begin--> Began --iterate--> Iterating --end--> Ended
//!                      ^                    |
//!                      +------rescan--------+
//! ```
//!
//! The connection and statement only exist in `Began` and `Iterating`.
//! Any error raised by a transition drops them and leaves the scan `Ended`.
//! Once sqlite runs out of rows the scan stays exhausted until `rescan`.

use pgrepr::scalar::Scalar;
use tracing::{debug, trace};

use crate::bind::{ParamValue, bind_params, evaluate_params};
use crate::convert::RowMaterializer;
use crate::errors::{Result, internal};
use crate::explain::explain_scan;
use crate::host::{ParamEvaluator, TableDesc};
use crate::options::TableSource;
use crate::planner::ScanPlan;
use crate::sqlite::{OpenMode, SqliteConnection, SqliteStatement, Step};

#[derive(Debug)]
struct ActiveScan {
    stmt: SqliteStatement,
    params: Vec<ParamValue>,
    /// sqlite restarts a finished statement on the next step.
    exhausted: bool,
}

/// One row produced by the scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRow {
    /// Host row, one value per table column.
    pub values: Vec<Scalar>,
    /// sqlite rowid, when the plan fetches it for UPDATE or DELETE.
    pub rowid: Option<i64>,
}

#[derive(Debug)]
enum ScanState {
    Planned,
    Began(ActiveScan),
    Iterating(ActiveScan),
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Planned,
    Began,
    Iterating,
    Ended,
}

#[derive(Debug)]
pub struct ForeignScan {
    plan: ScanPlan,
    source: TableSource,
    materializer: RowMaterializer,
    state: ScanState,
}

impl ForeignScan {
    pub fn new(plan: ScanPlan, table: &TableDesc, source: TableSource) -> Result<Self> {
        let materializer =
            RowMaterializer::new(table, &plan.retrieved_attrs, source.on_conversion_error)?
                .with_rowid(plan.fetch_rowid);
        Ok(ForeignScan {
            plan,
            source,
            materializer,
            state: ScanState::Planned,
        })
    }

    /// Rebuilds the scan from serialized plan data.
    pub fn from_fdw_private(fdw_private: &str, table: &TableDesc, source: TableSource) -> Result<Self> {
        let plan = ScanPlan::from_fdw_private(fdw_private)?;
        Self::new(plan, table, source)
    }

    pub fn query(&self) -> &str {
        &self.plan.query
    }

    pub fn phase(&self) -> ScanPhase {
        match self.state {
            ScanState::Planned => ScanPhase::Planned,
            ScanState::Began(_) => ScanPhase::Began,
            ScanState::Iterating(_) => ScanPhase::Iterating,
            ScanState::Ended => ScanPhase::Ended,
        }
    }

    /// Opens the database and prepares the query. With `explain_only` the
    /// scan stays planned and touches nothing.
    pub fn begin(
        &mut self,
        params: Option<&mut dyn ParamEvaluator>,
        explain_only: bool,
    ) -> Result<()> {
        debug!(query = %self.plan.query, explain_only, "begin foreign scan");

        if !matches!(self.state, ScanState::Planned) {
            return Err(internal!("begin called on a scan in phase {:?}", self.phase()));
        }
        if explain_only {
            return Ok(());
        }

        let result = self.open(params);
        match result {
            Ok(active) => {
                self.state = ScanState::Began(active);
                Ok(())
            }
            Err(e) => {
                self.state = ScanState::Ended;
                Err(e)
            }
        }
    }

    fn open(&self, params: Option<&mut dyn ParamEvaluator>) -> Result<ActiveScan> {
        let conn = SqliteConnection::open(&self.source.database, OpenMode::ReadOnly)?;
        let mut stmt = conn.prepare(&self.plan.query)?;
        let params = self.evaluate(params)?;
        bind_params(&mut stmt, &params)?;
        Ok(ActiveScan {
            stmt,
            params,
            exhausted: false,
        })
    }

    fn evaluate(&self, params: Option<&mut dyn ParamEvaluator>) -> Result<Vec<ParamValue>> {
        match params {
            Some(evaluator) => {
                let values = evaluate_params(evaluator)?;
                if values.len() != self.plan.param_count {
                    return Err(internal!(
                        "plan expects {} parameters, got {}",
                        self.plan.param_count,
                        values.len()
                    ));
                }
                Ok(values)
            }
            None if self.plan.param_count == 0 => Ok(Vec::new()),
            None => Err(internal!(
                "plan expects {} parameters, got none",
                self.plan.param_count
            )),
        }
    }

    /// Returns the next row, or `None` once sqlite has no more. An exhausted
    /// scan keeps returning `None` until it is rescanned.
    pub fn iterate(&mut self) -> Result<Option<ScanRow>> {
        let mut active = match std::mem::replace(&mut self.state, ScanState::Ended) {
            ScanState::Began(active) | ScanState::Iterating(active) => active,
            ScanState::Ended => return Ok(None),
            ScanState::Planned => {
                self.state = ScanState::Planned;
                return Err(internal!("iterate called before begin"));
            }
        };

        if active.exhausted {
            self.state = ScanState::Iterating(active);
            return Ok(None);
        }

        let row = match active.stmt.step() {
            Ok(Step::Row) => ScanRow {
                values: self.materializer.materialize(&active.stmt)?,
                rowid: self.materializer.rowid(&active.stmt)?,
            },
            Ok(Step::Done) => {
                trace!("foreign scan exhausted");
                active.exhausted = true;
                self.state = ScanState::Iterating(active);
                return Ok(None);
            }
            // active is dropped here, releasing statement and connection.
            Err(e) => return Err(e),
        };

        self.state = ScanState::Iterating(active);
        Ok(Some(row))
    }

    /// Restarts the scan. When new parameter values are given they replace
    /// the old bindings, so the rows may differ from the first pass.
    pub fn rescan(&mut self, params: Option<&mut dyn ParamEvaluator>) -> Result<()> {
        debug!(query = %self.plan.query, "rescan foreign scan");

        let mut active = match std::mem::replace(&mut self.state, ScanState::Ended) {
            ScanState::Began(active) | ScanState::Iterating(active) => active,
            other => {
                self.state = other;
                return Err(internal!("rescan called on a scan that is not running"));
            }
        };

        active.stmt.reset()?;
        active.exhausted = false;
        if params.is_some() {
            active.params = self.evaluate(params)?;
            active.stmt.clear_bindings();
            bind_params(&mut active.stmt, &active.params)?;
        }

        self.state = ScanState::Began(active);
        Ok(())
    }

    /// Releases the statement and connection. Safe to call in any phase,
    /// any number of times.
    pub fn end(&mut self) {
        debug!(phase = ?self.phase(), "end foreign scan");
        self.state = ScanState::Ended;
    }

    /// EXPLAIN output for this scan, from a separate connection.
    pub fn explain(&self, verbose: bool) -> Result<Vec<(String, String)>> {
        explain_scan(&self.source.database, &self.plan.query, verbose)
    }

    /// Parameter values currently bound, if running.
    pub fn bound_params(&self) -> Option<&[ParamValue]> {
        match &self.state {
            ScanState::Began(active) | ScanState::Iterating(active) => Some(&active.params),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pgrepr::types::PgType;

    use super::*;
    use crate::errors::{ErrorKind, SqliteFdwError};
    use crate::options::ConversionPolicy;
    use crate::planner::test_util::items_table;

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.db");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE items (id INTEGER NOT NULL, name TEXT, price DOUBLE);
             INSERT INTO items VALUES (1, 'apple', 5.0), (2, 'pear', 12.5), (3, NULL, 30.0);",
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

    fn plan(query: &str, attrs: &[i16], param_count: usize) -> ScanPlan {
        ScanPlan {
            query: query.to_string(),
            retrieved_attrs: attrs.to_vec(),
            param_count,
            fetch_rowid: false,
        }
    }

    fn drain(scan: &mut ForeignScan) -> Vec<Vec<Scalar>> {
        let mut rows = Vec::new();
        while let Some(row) = scan.iterate().unwrap() {
            rows.push(row.values);
        }
        rows
    }

    #[test]
    fn full_lifecycle() {
        let (_dir, path) = fixture();
        let mut scan = ForeignScan::new(
            plan("SELECT \"id\", \"price\" FROM \"items\" ORDER BY \"id\"", &[1, 3], 0),
            &items_table(),
            source(&path),
        )
        .unwrap();
        assert_eq!(scan.phase(), ScanPhase::Planned);

        scan.begin(None, false).unwrap();
        assert_eq!(scan.phase(), ScanPhase::Began);

        let rows = drain(&mut scan);
        assert_eq!(scan.phase(), ScanPhase::Iterating);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec![Scalar::Int8(2), Scalar::Null, Scalar::Float8(12.5)]);

        // Exhausted scans keep returning nothing.
        assert_eq!(scan.iterate().unwrap(), None);

        scan.rescan(None).unwrap();
        assert_eq!(drain(&mut scan).len(), 3);

        scan.end();
        assert_eq!(scan.phase(), ScanPhase::Ended);
        scan.end();
        assert_eq!(scan.iterate().unwrap(), None);
    }

    #[test]
    fn exhausted_until_rescan() {
        let (_dir, path) = fixture();
        let mut scan = ForeignScan::new(
            plan("SELECT \"id\" FROM \"items\" WHERE \"id\" < 3", &[1], 0),
            &items_table(),
            source(&path),
        )
        .unwrap();
        scan.begin(None, false).unwrap();

        assert_eq!(drain(&mut scan).len(), 2);
        for _ in 0..3 {
            assert_eq!(scan.iterate().unwrap(), None);
        }
        assert_eq!(scan.phase(), ScanPhase::Iterating);

        scan.rescan(None).unwrap();
        assert_eq!(scan.phase(), ScanPhase::Began);
        assert_eq!(drain(&mut scan).len(), 2);
        assert_eq!(scan.iterate().unwrap(), None);
    }

    #[test]
    fn rows_carry_rowid_when_fetched() {
        let (_dir, path) = fixture();
        let mut scan_plan = plan(
            "SELECT \"name\", rowid FROM \"items\" ORDER BY \"id\" DESC",
            &[2],
            0,
        );
        scan_plan.fetch_rowid = true;
        let mut scan = ForeignScan::new(scan_plan, &items_table(), source(&path)).unwrap();
        scan.begin(None, false).unwrap();

        let first = scan.iterate().unwrap().unwrap();
        assert_eq!(first.rowid, Some(3));
        assert_eq!(first.values, vec![Scalar::Null, Scalar::Null, Scalar::Null]);
        let second = scan.iterate().unwrap().unwrap();
        assert_eq!(second.rowid, Some(2));
        assert_eq!(second.values[1], Scalar::Text("pear".to_string()));

        // Plans without the rowid leave it unset.
        let mut scan = ForeignScan::new(
            plan("SELECT \"id\" FROM \"items\"", &[1], 0),
            &items_table(),
            source(&path),
        )
        .unwrap();
        scan.begin(None, false).unwrap();
        assert_eq!(scan.iterate().unwrap().unwrap().rowid, None);
    }

    #[test]
    fn end_without_begin() {
        let mut scan = ForeignScan::new(
            plan("SELECT \"id\" FROM \"items\"", &[1], 0),
            &items_table(),
            source(&PathBuf::from("/does/not/exist.db")),
        )
        .unwrap();

        scan.begin(None, true).unwrap();
        assert_eq!(scan.phase(), ScanPhase::Planned);
        scan.end();
        assert_eq!(scan.phase(), ScanPhase::Ended);
    }

    #[test]
    fn parameters_bound_and_rebound() {
        let (_dir, path) = fixture();
        let mut scan = ForeignScan::new(
            plan(
                "SELECT \"id\" FROM \"items\" WHERE (\"price\" > ?1) ORDER BY \"id\"",
                &[1],
                1,
            ),
            &items_table(),
            source(&path),
        )
        .unwrap();

        let mut params = vec![(PgType::FLOAT8, Scalar::Float8(10.0))];
        scan.begin(Some(&mut params), false).unwrap();
        assert_eq!(scan.bound_params().unwrap().len(), 1);
        let rows = drain(&mut scan);
        assert_eq!(
            rows,
            vec![
                vec![Scalar::Int8(2), Scalar::Null, Scalar::Null],
                vec![Scalar::Int8(3), Scalar::Null, Scalar::Null],
            ]
        );

        let mut params = vec![(PgType::FLOAT8, Scalar::Float8(20.0))];
        scan.rescan(Some(&mut params)).unwrap();
        let rows = drain(&mut scan);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], Scalar::Int8(3));
    }

    #[test]
    fn prepare_failure_ends_scan() {
        let (_dir, path) = fixture();
        let mut scan = ForeignScan::new(
            plan("SELECT \"id\" FROM \"nope\"", &[1], 0),
            &items_table(),
            source(&path),
        )
        .unwrap();

        let err = scan.begin(None, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StatementPrepareFailure);
        assert_eq!(scan.phase(), ScanPhase::Ended);
    }

    #[test]
    fn open_failure_ends_scan() {
        let dir = tempfile::tempdir().unwrap();
        let mut scan = ForeignScan::new(
            plan("SELECT \"id\" FROM \"items\"", &[1], 0),
            &items_table(),
            source(&dir.path().join("missing.db")),
        )
        .unwrap();

        let err = scan.begin(None, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionFailure);
        assert_eq!(scan.phase(), ScanPhase::Ended);
    }

    #[test]
    fn bind_failure_ends_scan() {
        let (_dir, path) = fixture();
        let mut scan = ForeignScan::new(
            plan("SELECT \"id\" FROM \"items\" WHERE \"name\" = ?1", &[1], 1),
            &items_table(),
            source(&path),
        )
        .unwrap();

        let mut params = vec![(PgType::UUID, Scalar::Other("1".to_string()))];
        let err = scan.begin(Some(&mut params), false).unwrap_err();
        assert!(matches!(err, SqliteFdwError::UnsupportedParamType(_)));
        assert_eq!(scan.phase(), ScanPhase::Ended);
    }

    #[test]
    fn conversion_failure_ends_scan() {
        let (_dir, path) = fixture();
        // name is text in sqlite, read it as the int8 id column.
        let mut scan = ForeignScan::new(
            plan("SELECT \"name\" FROM \"items\" ORDER BY \"id\"", &[1], 0),
            &items_table(),
            source(&path),
        )
        .unwrap();

        scan.begin(None, false).unwrap();
        let err = scan.iterate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(scan.phase(), ScanPhase::Ended);
    }

    #[test]
    fn iterate_before_begin() {
        let mut scan = ForeignScan::new(
            plan("SELECT 1", &[1], 0),
            &items_table(),
            source(&PathBuf::from("x.db")),
        )
        .unwrap();
        assert_eq!(scan.iterate().unwrap_err().kind(), ErrorKind::Internal);
        assert_eq!(scan.phase(), ScanPhase::Planned);
    }

    #[test]
    fn missing_params() {
        let (_dir, path) = fixture();
        let mut scan = ForeignScan::new(
            plan("SELECT \"id\" FROM \"items\" WHERE \"id\" = ?1", &[1], 1),
            &items_table(),
            source(&path),
        )
        .unwrap();
        assert!(scan.begin(None, false).is_err());
        assert_eq!(scan.phase(), ScanPhase::Ended);
    }
}
