//! Representation of host (Postgres) values.
//!
//! Values crossing into and out of the embedded engine are carried as
//! [`Scalar`](scalar::Scalar)s tagged with a Postgres [`Type`](types::PgType).
//! Text input and output follow Postgres' own formatting rules closely enough
//! for values to round trip through SQLite's dynamically typed columns.

pub mod error;
pub mod reader;
pub mod scalar;
pub mod types;
pub mod writer;
