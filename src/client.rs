//! Connection management: pooled client handle, liveness check, and
//! per-operation sessions.

use crate::backend::{Backend, MongoBackend};
use crate::error::{Result, StoreError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Pool size used when neither the caller nor the URI chooses one.
pub const DEFAULT_MAX_POOL_SIZE: u32 = 10;

/// Default per-operation deadline.
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 30_000;

/// Settings applied on top of the connection string.
///
/// The URI is parsed by the driver; a field left `None` keeps whatever the
/// URI (or the driver default) says. The one exception is the pool size,
/// which falls back to [`DEFAULT_MAX_POOL_SIZE`] when neither side sets it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// Server selection timeout in milliseconds.
    pub server_selection_timeout_ms: Option<u64>,
    /// Maximum number of connections in the pool.
    pub max_pool_size: Option<u32>,
    /// Minimum number of connections in the pool.
    pub min_pool_size: Option<u32>,
    /// Application name for server logs.
    pub app_name: Option<String>,
    /// Deadline applied to every store operation. `None` waits indefinitely.
    pub operation_timeout_ms: Option<u64>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: None,
            server_selection_timeout_ms: None,
            max_pool_size: None,
            min_pool_size: None,
            app_name: None,
            operation_timeout_ms: Some(DEFAULT_OPERATION_TIMEOUT_MS),
        }
    }
}

impl ClientOptions {
    /// Create a new ClientOptions with defaults.
    pub fn builder() -> ClientOptionsBuilder {
        ClientOptionsBuilder::default()
    }

    /// The per-operation deadline, if any.
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// Builder for ClientOptions.
#[derive(Debug, Clone, Default)]
pub struct ClientOptionsBuilder {
    options: ClientOptions,
}

impl ClientOptionsBuilder {
    /// Set the connection timeout.
    pub fn connect_timeout_ms(mut self, timeout: u64) -> Self {
        self.options.connect_timeout_ms = Some(timeout);
        self
    }

    /// Set the server selection timeout.
    pub fn server_selection_timeout_ms(mut self, timeout: u64) -> Self {
        self.options.server_selection_timeout_ms = Some(timeout);
        self
    }

    /// Set the maximum pool size.
    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.options.max_pool_size = Some(size);
        self
    }

    /// Set the minimum pool size.
    pub fn min_pool_size(mut self, size: u32) -> Self {
        self.options.min_pool_size = Some(size);
        self
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.options.app_name = Some(name.into());
        self
    }

    /// Set the per-operation deadline. `0` disables it.
    pub fn operation_timeout_ms(mut self, timeout: u64) -> Self {
        self.options.operation_timeout_ms = Some(timeout);
        self
    }

    /// Wait on operations without a deadline.
    pub fn no_operation_timeout(mut self) -> Self {
        self.options.operation_timeout_ms = None;
        self
    }

    /// Build the options.
    pub fn build(self) -> ClientOptions {
        self.options
    }
}

struct Shared<B: Backend> {
    backend: B,
    uri: String,
    default_database: Option<String>,
    options: ClientOptions,
    active_sessions: AtomicUsize,
    next_session_id: AtomicU64,
}

/// A pooled, process-wide handle to the database.
///
/// Create it once at startup and clone it into every component that needs
/// it; clones share the same pool. Safe for concurrent use without extra
/// locking.
///
/// # Example
///
/// ```ignore
/// use employee_store::Connection;
///
/// #[tokio::main]
/// async fn main() -> employee_store::Result<()> {
///     let connection = Connection::connect("mongodb://localhost:27017", 10).await?;
///     // Hand clones to stores, handlers, jobs...
///     connection.close().await;
///     Ok(())
/// }
/// ```
pub struct Connection<B: Backend = MongoBackend> {
    shared: Arc<Shared<B>>,
}

impl Connection<MongoBackend> {
    /// Connect to `uri` with at most `max_pool_size` pooled sockets.
    ///
    /// Fails with a connection error when the URI is malformed or the
    /// server does not answer the liveness ping. Does not retry.
    pub async fn connect(uri: &str, max_pool_size: u32) -> Result<Self> {
        let options = ClientOptions::builder().max_pool_size(max_pool_size).build();
        Self::with_options(uri, options).await
    }

    /// Connect using only the options found in the URI.
    pub async fn new(uri: &str) -> Result<Self> {
        Self::with_options(uri, ClientOptions::default()).await
    }

    /// Connect with custom options.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let options = ClientOptions::builder()
    ///     .connect_timeout_ms(10_000)
    ///     .app_name("employee-service")
    ///     .build();
    /// let connection = Connection::with_options("mongodb://localhost", options).await?;
    /// ```
    pub async fn with_options(uri: &str, options: ClientOptions) -> Result<Self> {
        let backend = MongoBackend::connect(uri, &options).await?;
        let default_database = backend.default_database().map(str::to_string);
        Self::establish(uri, default_database, backend, options).await
    }
}

impl<B: Backend> Connection<B> {
    /// Open a connection over an arbitrary backend and verify it with a ping.
    pub async fn open(backend: B, options: ClientOptions) -> Result<Self> {
        Self::establish("", None, backend, options).await
    }

    async fn establish(
        uri: &str,
        default_database: Option<String>,
        backend: B,
        options: ClientOptions,
    ) -> Result<Self> {
        backend.ping().await.map_err(|e| match e {
            StoreError::Connection(_) => e,
            other => StoreError::connection(other.to_string()),
        })?;

        tracing::info!(
            max_pool_size = ?options.max_pool_size,
            app_name = ?options.app_name,
            "connected to document store"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                backend,
                uri: uri.to_string(),
                default_database,
                options,
                active_sessions: AtomicUsize::new(0),
                next_session_id: AtomicU64::new(1),
            }),
        })
    }

    /// Get the backend (for advanced usage).
    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    /// Get the connection URI.
    pub fn uri(&self) -> &str {
        &self.shared.uri
    }

    /// Get the client options.
    pub fn options(&self) -> &ClientOptions {
        &self.shared.options
    }

    /// Get the database named in the connection URI path, if any.
    pub fn default_database(&self) -> Option<&str> {
        self.shared.default_database.as_deref()
    }

    /// Ping the server to check connectivity.
    pub async fn ping(&self) -> Result<()> {
        self.shared.backend.ping().await
    }

    /// Number of sessions currently held by in-flight operations.
    pub fn active_sessions(&self) -> usize {
        self.shared.active_sessions.load(Ordering::SeqCst)
    }

    /// Start a session scoped to a single operation.
    ///
    /// The session ends when the returned guard is dropped.
    pub async fn start_session(&self) -> Result<OperationSession<B::Session>> {
        let inner = self.shared.backend.start_session().await.map_err(|e| match e {
            StoreError::Session(_) => e,
            other => StoreError::session(other.to_string()),
        })?;

        let id = self.shared.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.shared.active_sessions.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(session_id = id, "session started");

        Ok(OperationSession {
            id,
            inner: Some(inner),
            shared: Arc::clone(&self.shared) as Arc<dyn SessionCounter>,
        })
    }

    /// Close the connection.
    ///
    /// Only the last handle actually shuts the backend down; other clones
    /// keep working.
    pub async fn close(self) {
        if let Ok(shared) = Arc::try_unwrap(self.shared) {
            shared.backend.shutdown().await;
            tracing::info!("document store connection closed");
        }
    }
}

impl<B: Backend> Clone for Connection<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Connection<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("uri", &self.shared.uri)
            .field("options", &self.shared.options)
            .field("active_sessions", &self.active_sessions())
            .finish()
    }
}

trait SessionCounter: Send + Sync {
    fn release(&self);
}

impl<B: Backend> SessionCounter for Shared<B> {
    fn release(&self) {
        self.active_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A session bound to exactly one store operation.
///
/// It carries no state across operations and gives no atomicity; it exists
/// so that every operation already follows an acquire/release discipline.
pub struct OperationSession<S> {
    id: u64,
    inner: Option<S>,
    shared: Arc<dyn SessionCounter>,
}

impl<S> OperationSession<S> {
    /// Session sequence number, unique per connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Engine-side session handle.
    pub fn inner_mut(&mut self) -> Option<&mut S> {
        self.inner.as_mut()
    }
}

impl<S> Drop for OperationSession<S> {
    fn drop(&mut self) {
        // The engine session ends with its handle.
        self.inner.take();
        self.shared.release();
        tracing::trace!(session_id = self.id, "session released");
    }
}

impl<S> std::fmt::Debug for OperationSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationSession").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Operation};

    #[test]
    fn test_client_options_default() {
        // Nothing overrides the URI unless asked to.
        let options = ClientOptions::default();
        assert_eq!(options.connect_timeout_ms, None);
        assert_eq!(options.server_selection_timeout_ms, None);
        assert_eq!(options.max_pool_size, None);
        assert_eq!(options.min_pool_size, None);
        assert!(options.app_name.is_none());
        assert_eq!(
            options.operation_timeout(),
            Some(Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS))
        );
    }

    #[test]
    fn test_client_options_builder() {
        let options = ClientOptions::builder()
            .connect_timeout_ms(10_000)
            .server_selection_timeout_ms(5_000)
            .max_pool_size(50)
            .min_pool_size(5)
            .app_name("test-app")
            .operation_timeout_ms(250)
            .build();

        assert_eq!(options.connect_timeout_ms, Some(10_000));
        assert_eq!(options.server_selection_timeout_ms, Some(5_000));
        assert_eq!(options.max_pool_size, Some(50));
        assert_eq!(options.min_pool_size, Some(5));
        assert_eq!(options.app_name, Some("test-app".to_string()));
        assert_eq!(options.operation_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_zero_or_missing_timeout_disables_deadline() {
        let options = ClientOptions::builder().operation_timeout_ms(0).build();
        assert_eq!(options.operation_timeout(), None);

        let options = ClientOptions::builder().no_operation_timeout().build();
        assert_eq!(options.operation_timeout(), None);
    }

    #[tokio::test]
    async fn test_open_pings_backend() {
        let backend = MemoryBackend::new();
        backend.fail_next(Operation::Ping, StoreError::query("no route to host"));

        let err = Connection::open(backend, ClientOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_sessions_are_counted_and_released() {
        let connection = Connection::open(MemoryBackend::new(), ClientOptions::default())
            .await
            .unwrap();

        let first = connection.start_session().await.unwrap();
        let second = connection.start_session().await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(connection.active_sessions(), 2);

        drop(first);
        assert_eq!(connection.active_sessions(), 1);
        drop(second);
        assert_eq!(connection.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_session_failure_is_session_error() {
        let backend = MemoryBackend::new();
        let connection = Connection::open(backend, ClientOptions::default())
            .await
            .unwrap();
        connection
            .backend()
            .fail_next(Operation::StartSession, StoreError::query("server busy"));

        let err = connection.start_session().await.unwrap_err();
        assert!(matches!(err, StoreError::Session(_)));
        assert_eq!(connection.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let connection = Connection::open(MemoryBackend::new(), ClientOptions::default())
            .await
            .unwrap();
        let clone = connection.clone();

        let _session = clone.start_session().await.unwrap();
        assert_eq!(connection.active_sessions(), 1);

        connection.close().await;
        assert!(clone.ping().await.is_ok());
    }
}
