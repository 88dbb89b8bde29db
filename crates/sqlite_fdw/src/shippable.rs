//! Decides which host objects sqlite may evaluate on our behalf.
//!
//! Objects owned by an extension listed in the server's `extensions` option
//! are shippable. Decisions are memoized per server until any foreign server
//! changes, at which point the whole cache is dropped.

use std::fmt;
use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::errors::{Result, SqliteFdwError};
use crate::host::{HostCatalog, InvalidationHub, Oid, QualifiedName};

/// Objects below this identifier were created at bootstrap.
pub const FIRST_BOOTSTRAP_OBJECT_ID: Oid = 10000;

/// Namespace of the host's built-in objects.
pub const PG_CATALOG_NAMESPACE: Oid = 11;

const SHIPPABLE_AGGREGATES: &[&str] = &["avg", "average", "max", "min", "sum"];
const SHIPPABLE_FUNCTIONS: &[&str] = &["abs", "coalesce"];
const SHIPPABLE_OPERATORS: &[&str] = &["=", "<>", "<", "<=", ">", ">=", "+", "-", "*", "/"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogKind {
    Function,
    Operator,
    Type,
}

impl CatalogKind {
    /// Identifier of the host catalog holding objects of this kind.
    pub const fn class_id(&self) -> Oid {
        match self {
            CatalogKind::Function => 1255,
            CatalogKind::Operator => 2617,
            CatalogKind::Type => 1247,
        }
    }
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogKind::Function => write!(f, "function"),
            CatalogKind::Operator => write!(f, "operator"),
            CatalogKind::Type => write!(f, "type"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CatalogObject {
    pub kind: CatalogKind,
    pub oid: Oid,
}

impl CatalogObject {
    pub const fn function(oid: Oid) -> Self {
        CatalogObject {
            kind: CatalogKind::Function,
            oid,
        }
    }

    pub const fn operator(oid: Oid) -> Self {
        CatalogObject {
            kind: CatalogKind::Operator,
            oid,
        }
    }

    pub const fn ty(oid: Oid) -> Self {
        CatalogObject {
            kind: CatalogKind::Type,
            oid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShippabilityKey {
    pub object: CatalogObject,
    pub server: Oid,
}

/// Per-relation view of which extensions are trusted.
#[derive(Debug, Clone, Copy)]
pub struct ShippingPolicy<'a> {
    pub server: Oid,
    pub extensions: &'a [Oid],
}

pub fn is_builtin(oid: Oid) -> bool {
    oid < FIRST_BOOTSTRAP_OBJECT_ID
}

/// Memoized shippability decisions.
#[derive(Debug, Default)]
pub struct ShippableCache {
    entries: RwLock<Option<HashMap<ShippabilityKey, bool>>>,
}

impl ShippableCache {
    /// Creates a cache that is flushed whenever the hub reports a server
    /// change.
    pub fn new(hub: &dyn InvalidationHub) -> Arc<Self> {
        let cache = Arc::new(ShippableCache::default());
        let weak: Weak<ShippableCache> = Arc::downgrade(&cache);
        hub.on_server_change(Box::new(move || {
            if let Some(cache) = weak.upgrade() {
                cache.flush_all();
            }
        }));
        cache
    }

    pub fn is_shippable(
        &self,
        object: CatalogObject,
        policy: ShippingPolicy<'_>,
        catalog: &dyn HostCatalog,
    ) -> bool {
        if is_builtin(object.oid) {
            return true;
        }
        if policy.extensions.is_empty() {
            return false;
        }

        let key = ShippabilityKey {
            object,
            server: policy.server,
        };

        if let Some(shippable) = self
            .entries
            .read()
            .as_ref()
            .and_then(|entries| entries.get(&key).copied())
        {
            trace!(?key, shippable, "shippability cache hit");
            return shippable;
        }

        // The catalog walk may fire invalidation, so no lock is held and no
        // entry exists until the answer is known.
        let shippable = catalog
            .extension_of_object(object)
            .is_some_and(|ext| policy.extensions.contains(&ext));
        debug!(?key, shippable, "computed shippability");

        let mut entries = self.entries.write();
        *entries
            .get_or_insert_with(HashMap::new)
            .entry(key)
            .or_insert(shippable)
    }

    pub fn flush_all(&self) {
        let mut entries = self.entries.write();
        if let Some(entries) = entries.as_mut() {
            debug!(num_entries = entries.len(), "flushing shippability cache");
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().as_ref().map_or(0, |e| e.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn allowlisted(name: Option<QualifiedName>, object: CatalogObject, allowed: &[&str]) -> Result<bool> {
    let name = name.ok_or(SqliteFdwError::LookupFailed {
        kind: object.kind,
        oid: object.oid,
    })?;
    Ok(name.namespace == PG_CATALOG_NAMESPACE && allowed.contains(&name.name.as_str()))
}

/// Aggregates sqlite computes the same way the host does.
pub fn is_shippable_agg(catalog: &dyn HostCatalog, oid: Oid) -> Result<bool> {
    allowlisted(
        catalog.function_name(oid),
        CatalogObject::function(oid),
        SHIPPABLE_AGGREGATES,
    )
}

pub fn is_shippable_func(catalog: &dyn HostCatalog, oid: Oid) -> Result<bool> {
    allowlisted(
        catalog.function_name(oid),
        CatalogObject::function(oid),
        SHIPPABLE_FUNCTIONS,
    )
}

pub fn is_shippable_op(catalog: &dyn HostCatalog, oid: Oid) -> Result<bool> {
    allowlisted(
        catalog.operator_name(oid),
        CatalogObject::operator(oid),
        SHIPPABLE_OPERATORS,
    )
}
