use crate::config::{ConnectionSettings, VaultSettings};
use crate::error::PhaseError;
use crate::vault::{DatabaseProfile, load_profile};
use sqlx::any::{AnyConnectOptions, AnyPoolOptions, install_default_drivers};
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyConnection, AnyPool, ConnectOptions, Connection};
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

/// Source of request-scoped database connections.
///
/// Every connection returned by `acquire` is handed back through `release`
/// exactly once; `ScopedConnection` enforces that pairing.
pub trait Connector: Send + Sync + 'static {
    type Connection: DerefMut<Target = AnyConnection> + Send;

    fn acquire(&self) -> impl Future<Output = Result<Self::Connection, PhaseError>> + Send;

    fn release(&self, conn: Self::Connection);
}

/// Exclusive lease on one connection for the lifetime of a request.
///
/// Released explicitly via [`ScopedConnection::release`] or, on any other exit
/// path (error, panic, cancelled future), when dropped.
pub struct ScopedConnection<'a, C: Connector> {
    connector: &'a C,
    conn: Option<C::Connection>,
}

impl<'a, C: Connector> ScopedConnection<'a, C> {
    pub async fn acquire(connector: &'a C) -> Result<Self, PhaseError> {
        let conn = connector.acquire().await?;
        Ok(Self {
            connector,
            conn: Some(conn),
        })
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.connector.release(conn);
        }
    }
}

impl<C: Connector> Deref for ScopedConnection<'_, C> {
    type Target = AnyConnection;

    fn deref(&self) -> &AnyConnection {
        self.conn
            .as_deref()
            .expect("connection is only taken when the lease ends")
    }
}

impl<C: Connector> DerefMut for ScopedConnection<'_, C> {
    fn deref_mut(&mut self) -> &mut AnyConnection {
        self.conn
            .as_deref_mut()
            .expect("connection is only taken when the lease ends")
    }
}

impl<C: Connector> Drop for ScopedConnection<'_, C> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Connection URL for a profile. Credentials are percent-encoded.
pub fn connection_url(profile: &DatabaseProfile) -> Result<Url, PhaseError> {
    let invalid = |what: &str| {
        PhaseError::InvalidSettings(format!("database {what} is not usable in a connection url"))
    };

    let mut url = Url::parse("postgres://localhost").map_err(|_| invalid("scheme"))?;
    url.set_host(Some(profile.host.trim()))
        .map_err(|_| invalid("host"))?;
    url.set_port(Some(profile.port)).map_err(|_| invalid("port"))?;
    url.set_username(&profile.user).map_err(|_| invalid("user"))?;
    url.set_password(Some(&profile.password))
        .map_err(|_| invalid("password"))?;
    url.path_segments_mut()
        .map_err(|_| invalid("service name"))?
        .clear()
        .push(profile.service_name.trim());
    Ok(url)
}

/// Connection URL with the password stripped, for logs.
pub fn sanitized_url(url: &Url) -> String {
    let mut safe = url.clone();
    let _ = safe.set_password(None);
    safe.to_string()
}

/// Driver options for the PostgreSQL url built from `profile`.
pub fn connect_options(profile: &DatabaseProfile) -> Result<AnyConnectOptions, PhaseError> {
    install_default_drivers();
    let url = connection_url(profile)?;
    AnyConnectOptions::from_url(&url).map_err(PhaseError::ConnectionFailed)
}

/// Pool built once from the startup profile; release returns the connection to the pool.
#[derive(Clone)]
pub struct PooledConnector {
    pool: AnyPool,
}

impl PooledConnector {
    /// Build the pool without touching the network; connections open on first acquire.
    pub fn connect_lazy(
        profile: &DatabaseProfile,
        settings: &ConnectionSettings,
    ) -> Result<Self, PhaseError> {
        let options = connect_options(profile)?;
        let pool = AnyPoolOptions::new()
            .max_connections(settings.max_connections.max(1))
            .acquire_timeout(settings.acquire_timeout())
            .test_before_acquire(true)
            .connect_lazy_with(options);

        info!(
            url = %sanitized_url(&connection_url(profile)?),
            max_connections = settings.max_connections.max(1),
            acquire_timeout = ?settings.acquire_timeout(),
            "database pool configured"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

impl Connector for PooledConnector {
    type Connection = PoolConnection<Any>;

    async fn acquire(&self) -> Result<Self::Connection, PhaseError> {
        self.pool.acquire().await.map_err(PhaseError::ConnectionFailed)
    }

    fn release(&self, conn: Self::Connection) {
        // Dropping a pool connection returns it to the idle queue.
        drop(conn);
    }
}

/// Turns a decrypted profile into driver connect options.
pub type OptionsBuilder =
    Arc<dyn Fn(&DatabaseProfile) -> Result<AnyConnectOptions, PhaseError> + Send + Sync>;

/// Decrypts the vault and opens a brand-new connection on every acquire,
/// closing it on release. Picks up rotated credentials without a restart.
#[derive(Clone)]
pub struct DirectConnector {
    vault: VaultSettings,
    options: OptionsBuilder,
    closing: Arc<Mutex<JoinSet<()>>>,
}

impl DirectConnector {
    /// Connects with the PostgreSQL url built from the profile.
    pub fn new(vault: VaultSettings) -> Self {
        Self::with_options(vault, connect_options)
    }

    pub fn with_options<F>(vault: VaultSettings, options: F) -> Self
    where
        F: Fn(&DatabaseProfile) -> Result<AnyConnectOptions, PhaseError> + Send + Sync + 'static,
    {
        install_default_drivers();
        Self {
            vault,
            options: Arc::new(options),
            closing: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Waits for released connections to finish closing. Returns how many were awaited.
    pub async fn drain(&self) -> usize {
        let mut pending = {
            let mut closing = self.closing.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *closing)
        };
        let mut awaited = 0;
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "connection close task failed");
            }
            awaited += 1;
        }
        awaited
    }
}

impl Connector for DirectConnector {
    type Connection = Box<AnyConnection>;

    async fn acquire(&self) -> Result<Self::Connection, PhaseError> {
        debug!("loading encrypted config for request");
        let profile = load_profile(&self.vault)?;
        let options = (self.options)(&profile)?;
        let conn = AnyConnection::connect_with(&options)
            .await
            .map_err(PhaseError::ConnectionFailed)?;
        Ok(Box::new(conn))
    }

    fn release(&self, conn: Self::Connection) {
        let conn = *conn;
        let Ok(handle) = Handle::try_current() else {
            // Outside a runtime the socket is dropped without a close handshake.
            drop(conn);
            return;
        };

        let mut closing = self.closing.lock().unwrap_or_else(PoisonError::into_inner);
        while closing.try_join_next().is_some() {}
        closing.spawn_on(
            async move {
                if let Err(e) = conn.close().await {
                    warn!(error = %e, "failed to close database connection cleanly");
                }
            },
            &handle,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> DatabaseProfile {
        DatabaseProfile {
            host: "db.plant.local".to_string(),
            port: 5432,
            service_name: "twin".to_string(),
            user: "reader".to_string(),
            password: "p@ss:w/rd".to_string(),
        }
    }

    #[test]
    fn url_percent_encodes_credentials() {
        let url = connection_url(&profile()).unwrap();
        assert_eq!(url.scheme(), "postgres");
        assert_eq!(url.host_str(), Some("db.plant.local"));
        assert_eq!(url.port(), Some(5432));
        assert_eq!(url.username(), "reader");
        assert_eq!(url.password(), Some("p%40ss%3Aw%2Frd"));
        assert_eq!(url.path(), "/twin");
    }

    #[test]
    fn sanitized_url_drops_password() {
        let url = connection_url(&profile()).unwrap();
        let safe = sanitized_url(&url);
        assert!(!safe.contains("p%40ss"));
        assert!(safe.contains("reader@db.plant.local:5432/twin"));
    }

    #[test]
    fn unusable_host_is_rejected() {
        let mut bad = profile();
        bad.host = "exa mple".to_string();
        let err = connection_url(&bad).unwrap_err();
        assert!(matches!(err, PhaseError::InvalidSettings(_)));
    }

    #[tokio::test]
    async fn pool_is_lazy() {
        let connector =
            PooledConnector::connect_lazy(&profile(), &ConnectionSettings::default()).unwrap();
        assert_eq!(connector.pool().size(), 0);
    }
}
