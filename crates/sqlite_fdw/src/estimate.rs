use std::path::Path;

use tracing::debug;

use crate::errors::{Result, SqliteFdwError};
use crate::sqlite::{OpenMode, SqliteConnection};

pub const DEFAULT_STARTUP_COST: f64 = 10.0;

/// Asks sqlite's planner how many rows `query` will produce.
///
/// Uses a throwaway read-only connection. The statement is prepared but
/// never stepped.
pub fn estimate_rows(database: &Path, query: &str) -> Result<i64> {
    debug!(database = %database.display(), %query, "estimating rows");

    let conn = SqliteConnection::open(database, OpenMode::ReadOnly)?;
    let stmt = conn.prepare(query)?;
    let estimate = stmt.scan_estimate()?;
    if !estimate.is_finite() || estimate < 0.0 {
        return Err(SqliteFdwError::EstimateFailed(format!(
            "invalid row estimate {estimate}"
        )));
    }

    Ok(estimate as i64)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathCost {
    pub rows: f64,
    pub startup_cost: f64,
    pub total_cost: f64,
}

/// Cost of the single foreign scan path. No pathkeys are offered.
pub fn foreign_path_cost(rows: f64) -> PathCost {
    PathCost {
        rows,
        startup_cost: DEFAULT_STARTUP_COST,
        total_cost: DEFAULT_STARTUP_COST + rows,
    }
}
