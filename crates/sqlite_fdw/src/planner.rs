//! Planning callbacks: relation sizing, path costing and plan creation.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::classify::{Classified, classify_conditions, separate_scan_clauses};
use crate::errors::Result;
use crate::estimate::{PathCost, estimate_rows, foreign_path_cost};
use crate::host::{AttrNumber, Deparser, ForeignExprSafety, Oid, RestrictClause, TableDesc};
use crate::options::TableSource;
use crate::shippable::ShippingPolicy;

/// Everything the planner learned about one foreign relation.
#[derive(Debug)]
pub struct RelationPushdownState<C> {
    pub source: TableSource,
    pub server: Oid,
    pub conds: Classified<C>,
    /// Columns sqlite must return: the target list plus whatever the local
    /// conditions reference.
    pub attrs_used: BTreeSet<AttrNumber>,
    pub shippable_extensions: Vec<Oid>,
    pub rows: f64,
    /// Set when the relation is the target of an UPDATE or DELETE.
    pub fetch_rowid: bool,
}

impl<C> RelationPushdownState<C> {
    pub fn remote_conds(&self) -> &[Arc<C>] {
        &self.conds.remote
    }

    pub fn local_conds(&self) -> &[Arc<C>] {
        &self.conds.local
    }

    /// Policy the foreign-safety test should use for this relation.
    pub fn shipping_policy(&self) -> ShippingPolicy<'_> {
        ShippingPolicy {
            server: self.server,
            extensions: &self.shippable_extensions,
        }
    }
}

/// Private plan data carried from planning to execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPlan {
    pub query: String,
    pub retrieved_attrs: Vec<AttrNumber>,
    pub param_count: usize,
    /// The query selects `rowid` after the retrieved attributes.
    #[serde(default)]
    pub fetch_rowid: bool,
}

impl ScanPlan {
    pub fn to_fdw_private(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_fdw_private(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Output of plan creation.
#[derive(Debug)]
pub struct ForeignPlan<C, P> {
    pub plan: ScanPlan,
    /// Serialized `plan`.
    pub fdw_private: String,
    /// Clauses the host rechecks on every returned row.
    pub local_exprs: Vec<Arc<C>>,
    pub remote_exprs: Vec<Arc<C>>,
    /// Runtime parameter expressions, in placeholder order.
    pub params: Vec<P>,
}

pub struct ForeignRelPlanner<'a, S: ?Sized, D: ?Sized> {
    pub table: &'a TableDesc,
    pub safety: &'a S,
    pub deparser: &'a D,
}

impl<'a, S: ?Sized, D: ?Sized> ForeignRelPlanner<'a, S, D> {
    pub fn new(table: &'a TableDesc, safety: &'a S, deparser: &'a D) -> Self {
        ForeignRelPlanner {
            table,
            safety,
            deparser,
        }
    }

    /// Classifies the base restrictions and estimates the relation size by
    /// asking sqlite to plan the query it would receive.
    pub fn get_foreign_rel_size<C>(
        &self,
        source: TableSource,
        server: Oid,
        shippable_extensions: Vec<Oid>,
        target_attrs: &BTreeSet<AttrNumber>,
        restrictions: &[Arc<C>],
    ) -> Result<RelationPushdownState<C>>
    where
        C: RestrictClause,
        S: ForeignExprSafety<C>,
        D: Deparser<C>,
    {
        debug!(table = %self.table, "get foreign rel size");

        let conds = classify_conditions(self.safety, self.table, restrictions);
        let mut attrs_used = target_attrs.clone();
        attrs_used.extend(conds.local_attrs());

        let (mut sql, _) = self
            .deparser
            .deparse_select(self.table, &attrs_used, &source.table, false);
        if !conds.remote.is_empty() {
            let mut params = Vec::new();
            self.deparser
                .append_where_clause(&mut sql, self.table, &conds.remote, true, &mut params);
        }
        trace!(?sql, "sizing query");

        let rows = estimate_rows(&source.database, &sql)? as f64;
        debug!(rows, "estimated foreign rel size");

        Ok(RelationPushdownState {
            source,
            server,
            conds,
            attrs_used,
            shippable_extensions,
            rows,
            fetch_rowid: false,
        })
    }

    /// Marks the relation as the target of an UPDATE or DELETE. The scan then
    /// returns the sqlite rowid of every row alongside its values.
    pub fn add_foreign_update_targets<C>(&self, state: &mut RelationPushdownState<C>) {
        debug!(table = %self.table, "add foreign update targets");
        state.fetch_rowid = true;
    }

    pub fn get_foreign_paths<C>(&self, state: &RelationPushdownState<C>) -> PathCost {
        debug!(table = %self.table, rows = state.rows, "get foreign paths");
        foreign_path_cost(state.rows)
    }

    pub fn get_foreign_plan<C>(
        &self,
        state: &RelationPushdownState<C>,
        scan_clauses: &[Arc<C>],
    ) -> Result<ForeignPlan<C, D::Param>>
    where
        C: RestrictClause,
        S: ForeignExprSafety<C>,
        D: Deparser<C>,
    {
        debug!(table = %self.table, "get foreign plan");

        let conds = separate_scan_clauses(&state.conds, self.safety, self.table, scan_clauses);

        let (mut query, retrieved_attrs) = self.deparser.deparse_select(
            self.table,
            &state.attrs_used,
            &state.source.table,
            state.fetch_rowid,
        );
        let mut params = Vec::new();
        if !conds.remote.is_empty() {
            self.deparser
                .append_where_clause(&mut query, self.table, &conds.remote, true, &mut params);
        }
        trace!(?query, ?retrieved_attrs, "remote query");

        let plan = ScanPlan {
            query,
            retrieved_attrs,
            param_count: params.len(),
            fetch_rowid: state.fetch_rowid,
        };
        let fdw_private = plan.to_fdw_private()?;

        Ok(ForeignPlan {
            plan,
            fdw_private,
            local_exprs: conds.local,
            remote_exprs: conds.remote,
            params,
        })
    }
}
