//! Prefix-dispatched method routing.
//!
//! The method namespace is flat but partitioned by a `domain/operation`
//! convention (`sketch/read`, `task/get`). The router maps each domain
//! prefix to one handler object; handlers receive the operation suffix and
//! the raw parameter bag. An unknown prefix — or an unknown suffix, by
//! handler contract — yields [`Error::MethodNotFound`], which travels with
//! its own wire code so callers can tell "not implemented" from "failed
//! while running".
//!
//! Handlers are pure with respect to this layer: concurrency and side
//! effects are their own concern.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A domain handler: the server's only contract with backend services.
///
/// `method` is the operation suffix (the part after `domain/`); `params` is
/// the opaque parameter bag from the request. Implementations return the
/// result payload or a typed error — an unknown suffix should be answered
/// with [`Error::method_not_found`] carrying the full method name.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Handles one operation of this handler's domain.
    async fn handle(&self, method: &str, params: Map<String, Value>) -> Result<Value>;
}

/// Maps domain prefixes to handler objects.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use serde_json::{json, Map, Value};
/// use toolbridge::{MethodHandler, MethodRouter, Result};
///
/// struct StatusHandler;
///
/// #[async_trait]
/// impl MethodHandler for StatusHandler {
///     async fn handle(&self, method: &str, _params: Map<String, Value>) -> Result<Value> {
///         match method {
///             "ping" => Ok(json!({"pong": true})),
///             other => Err(toolbridge::Error::method_not_found(format!("status/{other}"))),
///         }
///     }
/// }
///
/// let router = MethodRouter::new().register("status", Arc::new(StatusHandler));
/// # let _ = router;
/// ```
#[derive(Default)]
pub struct MethodRouter {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRouter {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for every method under `domain/`. Replaces any
    /// previous handler for the same domain.
    pub fn register(mut self, domain: impl Into<String>, handler: Arc<dyn MethodHandler>) -> Self {
        self.handlers.insert(domain.into(), handler);
        self
    }

    /// Returns `true` if a handler is registered for `domain`.
    pub fn has_domain(&self, domain: &str) -> bool {
        self.handlers.contains_key(domain)
    }

    /// Routes one request to its domain handler.
    pub async fn dispatch(&self, method: &str, params: Map<String, Value>) -> Result<Value> {
        let Some((domain, suffix)) = method.split_once('/') else {
            return Err(Error::method_not_found(method));
        };
        let Some(handler) = self.handlers.get(domain) else {
            return Err(Error::method_not_found(method));
        };
        handler.handle(suffix, params).await
    }
}

impl std::fmt::Debug for MethodRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut domains: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        domains.sort_unstable();
        f.debug_struct("MethodRouter")
            .field("domains", &domains)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CODE_METHOD_NOT_FOUND;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl MethodHandler for EchoHandler {
        async fn handle(&self, method: &str, params: Map<String, Value>) -> Result<Value> {
            match method {
                "echo" => Ok(Value::Object(params)),
                "fail" => Err(Error::handler("echo handler failure")),
                other => Err(Error::method_not_found(format!("util/{other}"))),
            }
        }
    }

    fn router() -> MethodRouter {
        MethodRouter::new().register("util", Arc::new(EchoHandler))
    }

    #[tokio::test]
    async fn known_method_dispatches_to_handler() {
        let params = json!({"value": 7}).as_object().cloned().unwrap();
        let result = router().dispatch("util/echo", params).await.unwrap();
        assert_eq!(result["value"], 7);
    }

    #[tokio::test]
    async fn unknown_domain_is_method_not_found() {
        let err = router().dispatch("nope/echo", Map::new()).await.unwrap_err();
        assert_eq!(err.error_code(), CODE_METHOD_NOT_FOUND);
        assert!(err.to_string().contains("nope/echo"));
    }

    #[tokio::test]
    async fn unknown_suffix_is_method_not_found() {
        let err = router()
            .dispatch("util/missing", Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), CODE_METHOD_NOT_FOUND);
        assert!(err.to_string().contains("util/missing"));
    }

    #[tokio::test]
    async fn method_without_separator_is_method_not_found() {
        let err = router().dispatch("echo", Map::new()).await.unwrap_err();
        assert_eq!(err.error_code(), CODE_METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn handler_error_is_distinguishable_from_routing_error() {
        let err = router().dispatch("util/fail", Map::new()).await.unwrap_err();
        assert_eq!(err.error_code(), -1);
    }

    #[test]
    fn has_domain_reflects_registrations() {
        let router = router();
        assert!(router.has_domain("util"));
        assert!(!router.has_domain("sketch"));
    }
}
