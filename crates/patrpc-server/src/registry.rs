//! Pattern-to-handler registry.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::error::HandlerError;

/// Outcome of a single handler invocation.
pub type HandlerResult = Result<Value, HandlerError>;

/// A handler invoked for requests matching a pattern.
///
/// Each invocation receives its own copy of the request payload, so a retried
/// attempt sees exactly the input of the first one.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one request payload.
    fn handle(&self, data: Value) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, data: Value) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self(data))
    }
}

/// Shared handle to a registered handler.
pub type SharedHandler = Arc<dyn MessageHandler>;

/// Thread-safe mapping from command name to handler.
///
/// Registering a pattern that already exists replaces the previous handler.
#[derive(Default)]
pub struct PatternRegistry {
    handlers: RwLock<HashMap<String, SharedHandler>>,
}

impl PatternRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure handler. Returns `true` if a previous handler was replaced.
    pub fn register<F, Fut>(&self, pattern: impl Into<String>, handler: F) -> bool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_shared(pattern, Arc::new(handler))
    }

    /// Register an already shared handler. Returns `true` if a previous handler was replaced.
    pub fn register_shared(&self, pattern: impl Into<String>, handler: SharedHandler) -> bool {
        let pattern = pattern.into();
        let replaced = self.handlers.write().insert(pattern.clone(), handler).is_some();
        debug!(pattern = %pattern, replaced, "Handler registered");
        replaced
    }

    /// Look up the handler for a pattern.
    #[must_use]
    pub fn lookup(&self, pattern: &str) -> Option<SharedHandler> {
        self.handlers.read().get(pattern).cloned()
    }

    /// Check whether a pattern has a handler.
    #[must_use]
    pub fn contains(&self, pattern: &str) -> bool {
        self.handlers.read().contains_key(pattern)
    }

    /// Number of registered patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Check if no pattern is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Registered patterns, sorted.
    #[must_use]
    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self.handlers.read().keys().cloned().collect();
        patterns.sort();
        patterns
    }
}

impl fmt::Debug for PatternRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternRegistry")
            .field("patterns", &self.patterns())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constant(value: Value) -> impl Fn(Value) -> BoxFuture<'static, HandlerResult> + Send + Sync {
        move |_| {
            let value = value.clone();
            Box::pin(async move { Ok(value) })
        }
    }

    #[test]
    fn test_new_registry_is_empty() {
        let registry = PatternRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.lookup("anything").is_none());
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = PatternRegistry::new();
        let replaced = registry.register("echo", |data| async move { Ok::<_, HandlerError>(data) });

        assert!(!replaced);
        assert!(registry.contains("echo"));

        let handler = registry.lookup("echo").unwrap();
        let result = handler.handle(json!({"x": 1})).await.unwrap();
        assert_eq!(result, json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_register_overwrites() {
        let registry = PatternRegistry::new();
        registry.register("version", constant(json!(1)));
        let replaced = registry.register("version", constant(json!(2)));

        assert!(replaced);
        assert_eq!(registry.len(), 1);

        let handler = registry.lookup("version").unwrap();
        assert_eq!(handler.handle(Value::Null).await.unwrap(), json!(2));
    }

    #[test]
    fn test_patterns_sorted() {
        let registry = PatternRegistry::new();
        registry.register("b", constant(json!(null)));
        registry.register("a", constant(json!(null)));
        registry.register("c", constant(json!(null)));

        assert_eq!(registry.patterns(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let registry = PatternRegistry::new();
        registry.register("Echo", constant(json!(null)));
        assert!(registry.lookup("echo").is_none());
    }

    #[test]
    fn test_debug_lists_patterns() {
        let registry = PatternRegistry::new();
        registry.register("sum", constant(json!(0)));
        let debug = format!("{registry:?}");
        assert!(debug.contains("PatternRegistry"));
        assert!(debug.contains("sum"));
    }

    #[tokio::test]
    async fn test_concurrent_register_and_lookup() {
        let registry = Arc::new(PatternRegistry::new());

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry.register(format!("p{}", i % 4), constant(json!(i)));
                    registry.register("shared", constant(json!(i)));
                })
            })
            .collect();
        let readers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    if let Some(handler) = registry.lookup("shared") {
                        let value = handler.handle(Value::Null).await.unwrap();
                        assert!(value.as_i64().is_some_and(|n| (0..8).contains(&n)));
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(readers) {
            handle.await.unwrap();
        }

        assert_eq!(registry.len(), 5);
        let value = registry
            .lookup("shared")
            .unwrap()
            .handle(Value::Null)
            .await
            .unwrap();
        assert!(value.as_i64().is_some_and(|n| (0..8).contains(&n)));
    }
}
