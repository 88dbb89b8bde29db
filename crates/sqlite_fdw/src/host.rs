//! Interfaces the host database provides to the wrapper.
//!
//! The planner, deparser, catalog and expression walker all live in the
//! host. The wrapper only sees them through the traits below.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use pgrepr::scalar::Scalar;
use pgrepr::types::PgType;

use crate::errors::Result;
use crate::shippable::CatalogObject;

/// Object identifier as handed out by the host catalog.
pub type Oid = u32;

/// One-based column position within a host relation.
pub type AttrNumber = i16;

/// Schema-qualified object name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    pub namespace: Oid,
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace: Oid, name: impl Into<String>) -> Self {
        QualifiedName {
            namespace,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDesc {
    pub name: String,
    pub attnum: AttrNumber,
    pub ty: PgType,
    pub not_null: bool,
}

/// Descriptor of the host side foreign table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDesc {
    pub relid: Oid,
    pub name: String,
    pub columns: Vec<ColumnDesc>,
}

impl TableDesc {
    pub fn column(&self, attnum: AttrNumber) -> Option<&ColumnDesc> {
        self.columns.iter().find(|c| c.attnum == attnum)
    }
}

impl fmt::Display for TableDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.relid)
    }
}

/// Catalog access needed for shippability decisions.
pub trait HostCatalog {
    /// Extension owning the object, if any.
    fn extension_of_object(&self, object: CatalogObject) -> Option<Oid>;

    fn function_name(&self, oid: Oid) -> Option<QualifiedName>;

    fn operator_name(&self, oid: Oid) -> Option<QualifiedName>;

    fn extension_oid(&self, name: &str) -> Option<Oid>;
}

/// Callback fired whenever foreign server metadata changes.
pub type InvalidationCallback = Box<dyn Fn() + Send + Sync>;

pub trait InvalidationHub {
    fn on_server_change(&self, callback: InvalidationCallback);
}

/// A restriction clause as seen by the wrapper.
///
/// Clauses are passed around as `Arc<C>`; two clauses are the same clause
/// only when they share an allocation.
pub trait RestrictClause {
    fn referenced_attrs(&self) -> BTreeSet<AttrNumber>;

    fn is_pseudoconstant(&self) -> bool {
        false
    }
}

/// Decides whether a single clause can be evaluated by sqlite.
pub trait ForeignExprSafety<C> {
    fn is_foreign_expr(&self, table: &TableDesc, clause: &C) -> bool;
}

/// SQL text generation for the remote query.
pub trait Deparser<C> {
    /// Runtime parameter expression referenced by a `?N` placeholder.
    type Param;

    /// Builds `SELECT ... FROM remote_table`, returning the text and the
    /// attribute numbers in the order they are selected. With `fetch_rowid`
    /// the sqlite `rowid` is selected last, after those attributes.
    fn deparse_select(
        &self,
        table: &TableDesc,
        attrs_used: &BTreeSet<AttrNumber>,
        remote_table: &str,
        fetch_rowid: bool,
    ) -> (String, Vec<AttrNumber>);

    /// Appends `WHERE`/`AND` conditions, pushing any runtime parameters in
    /// placeholder order.
    fn append_where_clause(
        &self,
        buf: &mut String,
        table: &TableDesc,
        conds: &[Arc<C>],
        is_first: bool,
        params: &mut Vec<Self::Param>,
    );
}

/// Evaluates runtime parameter expressions of a scan.
pub trait ParamEvaluator {
    /// Declared host types, in placeholder order.
    fn param_types(&self) -> Vec<PgType>;

    fn evaluate(&mut self, index: usize) -> Result<Scalar>;
}

impl ParamEvaluator for Vec<(PgType, Scalar)> {
    fn param_types(&self) -> Vec<PgType> {
        self.iter().map(|(ty, _)| ty.clone()).collect()
    }

    fn evaluate(&mut self, index: usize) -> Result<Scalar> {
        self.get(index)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| crate::errors::internal!("no parameter at index {index}"))
    }
}
