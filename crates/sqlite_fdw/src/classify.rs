//! Splits restriction clauses into the ones sqlite evaluates and the ones
//! the host must recheck.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::host::{AttrNumber, ForeignExprSafety, RestrictClause, TableDesc};

/// A partition of a clause list. Every input clause lands in exactly one of
/// the two lists, keeping input order.
#[derive(Debug)]
pub struct Classified<C> {
    pub remote: Vec<Arc<C>>,
    pub local: Vec<Arc<C>>,
}

impl<C> Default for Classified<C> {
    fn default() -> Self {
        Classified {
            remote: Vec::new(),
            local: Vec::new(),
        }
    }
}

impl<C: RestrictClause> Classified<C> {
    /// Columns the local clauses need fetched from sqlite.
    pub fn local_attrs(&self) -> BTreeSet<AttrNumber> {
        self.local
            .iter()
            .flat_map(|clause| clause.referenced_attrs())
            .collect()
    }
}

pub fn classify_conditions<C, S>(
    safety: &S,
    table: &TableDesc,
    clauses: &[Arc<C>],
) -> Classified<C>
where
    S: ForeignExprSafety<C> + ?Sized,
{
    let mut classified = Classified::default();
    for clause in clauses {
        if safety.is_foreign_expr(table, clause) {
            classified.remote.push(clause.clone());
        } else {
            classified.local.push(clause.clone());
        }
    }
    classified
}

fn contains_ptr<C>(list: &[Arc<C>], clause: &Arc<C>) -> bool {
    list.iter().any(|c| Arc::ptr_eq(c, clause))
}

/// Classifies the clauses handed to plan creation.
///
/// Clauses already seen while sizing the relation keep their earlier
/// placement. Anything new is a join clause and goes through the safety
/// test. Pseudo-constant clauses are handled by the host and dropped.
pub fn separate_scan_clauses<C, S>(
    earlier: &Classified<C>,
    safety: &S,
    table: &TableDesc,
    scan_clauses: &[Arc<C>],
) -> Classified<C>
where
    C: RestrictClause,
    S: ForeignExprSafety<C> + ?Sized,
{
    let mut classified = Classified::default();
    for clause in scan_clauses {
        if clause.is_pseudoconstant() {
            continue;
        }

        if contains_ptr(&earlier.remote, clause) {
            classified.remote.push(clause.clone());
        } else if contains_ptr(&earlier.local, clause) {
            classified.local.push(clause.clone());
        } else if safety.is_foreign_expr(table, clause) {
            classified.remote.push(clause.clone());
        } else {
            classified.local.push(clause.clone());
        }
    }
    classified
}
