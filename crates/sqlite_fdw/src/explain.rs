use std::path::Path;

use tracing::debug;

use crate::errors::Result;
use crate::sqlite::{OpenMode, SqliteConnection, Step};

/// Detail column of `EXPLAIN QUERY PLAN` output.
const PLAN_DETAIL_COLUMN: usize = 3;

/// Extra EXPLAIN properties for a foreign scan.
///
/// Returns `sqlite query` (verbose only) followed by one `sqlite plan` entry
/// per line of sqlite's own query plan.
pub fn explain_scan(database: &Path, query: &str, verbose: bool) -> Result<Vec<(String, String)>> {
    debug!(database = %database.display(), verbose, "explain foreign scan");

    let mut props = Vec::new();
    if verbose {
        props.push(("sqlite query".to_string(), query.to_string()));
    }

    let conn = SqliteConnection::open(database, OpenMode::ReadOnly)?;
    let mut stmt = conn.prepare(&format!("EXPLAIN QUERY PLAN {query}"))?;
    while let Step::Row = stmt.step()? {
        let detail = stmt.column_text(PLAN_DETAIL_COLUMN).unwrap_or_default();
        props.push(("sqlite plan".to_string(), detail));
    }

    Ok(props)
}
