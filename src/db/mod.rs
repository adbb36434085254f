//! Database access for phase readings.
//!
//! Layout:
//! - `connector.rs`: request-scoped connection leasing (pooled or per-request)
//! - `query.rs`: the random single-row sample and its SQL

pub mod connector;
pub mod query;

pub use connector::{Connector, DirectConnector, PooledConnector, ScopedConnection};
pub use query::{PhaseQuery, fetch_random_phase};
