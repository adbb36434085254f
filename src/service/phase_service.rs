use crate::config::ConnectionSettings;
use crate::db::{Connector, PhaseQuery, ScopedConnection, fetch_random_phase};
use crate::error::{DbStage, PhaseError};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Per-request pipeline: lease a connection, sample one reading, release.
pub struct PhaseService<C: Connector> {
    connector: C,
    query: PhaseQuery,
    acquire_timeout: Duration,
    query_timeout: Duration,
}

impl<C: Connector> PhaseService<C> {
    pub fn new(connector: C, query: PhaseQuery, settings: &ConnectionSettings) -> Self {
        Self {
            connector,
            query,
            acquire_timeout: settings.acquire_timeout(),
            query_timeout: settings.query_timeout(),
        }
    }

    /// The lease is released exactly once on every path, including timeouts.
    pub async fn sample(&self) -> Result<Option<f64>, PhaseError> {
        debug!(table = self.query.table(), "acquiring connection");
        let mut conn = timeout(self.acquire_timeout, ScopedConnection::acquire(&self.connector))
            .await
            .map_err(|_| PhaseError::DatabaseTimeout {
                stage: DbStage::Acquire,
                after: self.acquire_timeout,
            })??;

        debug!("executing random sample query");
        let result = match timeout(self.query_timeout, fetch_random_phase(&mut conn, &self.query))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(PhaseError::DatabaseTimeout {
                stage: DbStage::Query,
                after: self.query_timeout,
            }),
        };

        conn.release();
        result
    }
}
