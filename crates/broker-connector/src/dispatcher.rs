//! Worker dispatchers for blocking broker calls.
//!
//! Broker client calls block. A [`Dispatcher`] runs them on the tokio
//! blocking pool of a runtime, with a semaphore bounding how many run at
//! once. Callers await the result; the stage task is never blocked.

use crate::error::{ConnectorError, ConnectorResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

/// Name of the dispatcher used when settings do not name one.
pub const DEFAULT_DISPATCHER: &str = "broker-connector.default-dispatcher";

/// Concurrent blocking calls allowed on the default dispatcher.
pub const DEFAULT_POOL_SIZE: usize = 16;

/// A named execution context for blocking broker I/O.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    name: Arc<str>,
    handle: Handle,
    permits: Arc<Semaphore>,
    pool_size: usize,
}

impl Dispatcher {
    /// Create a dispatcher on the given runtime.
    pub fn new(name: impl Into<String>, handle: Handle, pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            name: Arc::from(name.into()),
            handle,
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_size,
        }
    }

    /// Create a dispatcher on the runtime the caller is running in.
    pub fn from_current(name: impl Into<String>, pool_size: usize) -> ConnectorResult<Self> {
        let name = name.into();
        let handle = Handle::try_current().map_err(|e| {
            ConnectorError::Config(format!("No runtime available for dispatcher {}: {}", name, e))
        })?;
        Ok(Self::new(name, handle, pool_size))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Spawn an async task on this dispatcher's runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Run a blocking closure on the worker pool and await its result.
    pub async fn run_blocking<F, T>(&self, f: F) -> ConnectorResult<T>
    where
        F: FnOnce() -> ConnectorResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ConnectorError::Worker(format!("Dispatcher {} is closed", self.name)))?;

        self.handle
            .spawn_blocking(move || {
                let _permit = permit;
                f()
            })
            .await
            .map_err(|e| ConnectorError::Worker(e.to_string()))?
    }
}

/// Dispatchers available to connectors, by name.
#[derive(Debug, Clone, Default)]
pub struct DispatcherRegistry {
    dispatchers: HashMap<String, Dispatcher>,
}

impl DispatcherRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the default dispatcher on the current runtime.
    pub fn with_current_default() -> ConnectorResult<Self> {
        let mut registry = Self::new();
        registry.register(Dispatcher::from_current(DEFAULT_DISPATCHER, DEFAULT_POOL_SIZE)?);
        Ok(registry)
    }

    /// Register a dispatcher, replacing any with the same name.
    pub fn register(&mut self, dispatcher: Dispatcher) {
        debug!(
            dispatcher = %dispatcher.name(),
            pool_size = dispatcher.pool_size(),
            "Registered dispatcher"
        );
        self.dispatchers
            .insert(dispatcher.name().to_string(), dispatcher);
    }

    /// Look up a dispatcher by name.
    pub fn resolve(&self, name: &str) -> ConnectorResult<Dispatcher> {
        self.dispatchers
            .get(name)
            .cloned()
            .ok_or_else(|| ConnectorError::Config(format!("Unknown dispatcher: {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_from_current_outside_runtime() {
        let err = Dispatcher::from_current("io", 4).unwrap_err();
        assert!(matches!(err, ConnectorError::Config(_)));
    }

    #[tokio::test]
    async fn test_resolve_unknown_dispatcher() {
        let registry = DispatcherRegistry::with_current_default().unwrap();
        assert!(registry.resolve(DEFAULT_DISPATCHER).is_ok());

        let err = registry.resolve("missing").unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: Unknown dispatcher: missing");
    }

    #[tokio::test]
    async fn test_run_blocking_returns_result() {
        let dispatcher = Dispatcher::from_current("io", 2).unwrap();
        let value = dispatcher.run_blocking(|| Ok(21 * 2)).await.unwrap();
        assert_eq!(value, 42);

        let err = dispatcher
            .run_blocking::<_, ()>(|| Err(ConnectorError::Config("nope".to_string())))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Config(_)));
    }

    #[tokio::test]
    async fn test_panic_maps_to_worker_error() {
        let dispatcher = Dispatcher::from_current("io", 1).unwrap();
        let err = dispatcher
            .run_blocking::<_, ()>(|| panic!("broker client crashed"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Worker(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pool_size_bounds_concurrency() {
        let dispatcher = Dispatcher::from_current("io", 2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let dispatcher = dispatcher.clone();
            let running = running.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                dispatcher
                    .run_blocking(move || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(30));
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
