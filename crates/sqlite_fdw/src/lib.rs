//! Foreign data wrapper engine for sqlite databases.
//!
//! Decides which parts of a host query sqlite can evaluate, then runs the
//! delegated query, modification or catalog import against a sqlite file
//! and converts values between the two type systems.

pub mod bind;
pub mod classify;
pub mod convert;
pub mod errors;
pub mod estimate;
pub mod explain;
pub mod host;
pub mod import;
pub mod modify;
pub mod options;
pub mod planner;
pub mod quote;
pub mod scan;
pub mod shippable;
pub mod sqlite;
