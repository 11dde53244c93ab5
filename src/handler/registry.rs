//! Handler registry for dispatching calls by method name.
//!
//! A registered handler is a type-erased pair: decode-and-validate the JSON
//! argument payload, then invoke the typed closure. Both halves are produced
//! once at registration time, so dispatch needs no runtime type inspection.
//!
//! The registry is populated before the server starts accepting connections
//! and is read-only afterwards.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{Args, BoxFuture, HandlerResult, HealthCheck, ServerContext};
use crate::error::{Result, WirelineError};

/// Type-erased call handler.
pub trait Handler: Send + Sync {
    /// Decode the JSON argument payload into the handler's argument type and
    /// validate it.
    fn decode_args(&self, payload: &[u8]) -> Result<Box<dyn Any + Send>>;

    /// Invoke the handler with arguments produced by `decode_args`.
    fn call(&self, ctx: ServerContext, args: Box<dyn Any + Send>) -> BoxFuture<'static, HandlerResult>;
}

/// Wrapper binding a typed async closure to the [`Handler`] contract.
pub struct TypedHandler<A, F> {
    handler: F,
    _marker: PhantomData<fn(A)>,
}

impl<A, F, Fut> TypedHandler<A, F>
where
    A: Args,
    F: Fn(ServerContext, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

impl<A, F, Fut> Handler for TypedHandler<A, F>
where
    A: Args,
    F: Fn(ServerContext, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn decode_args(&self, payload: &[u8]) -> Result<Box<dyn Any + Send>> {
        let args: A = serde_json::from_slice(payload)?;
        args.validate()?;
        Ok(Box::new(args))
    }

    fn call(&self, ctx: ServerContext, args: Box<dyn Any + Send>) -> BoxFuture<'static, HandlerResult> {
        let args = match args.downcast::<A>() {
            Ok(args) => *args,
            Err(_) => {
                return Box::pin(async {
                    Err(WirelineError::Protocol("argument type mismatch".into()))
                })
            }
        };
        Box::pin((self.handler)(ctx, args))
    }
}

/// Registry mapping method names to handlers, plus the health probes.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
    health_checks: Vec<Box<dyn HealthCheck>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            health_checks: Vec::new(),
        }
    }

    /// Register a handler under a unique, non-empty method name.
    ///
    /// Object-style methods use the `Type.Method` naming convention, e.g.
    /// `"Service.Sum"`.
    pub fn register<A, F, Fut>(&mut self, name: &str, handler: F) -> Result<()>
    where
        A: Args,
        F: Fn(ServerContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        if name.is_empty() {
            return Err(WirelineError::EmptyHandlerName);
        }
        if self.handlers.contains_key(name) {
            return Err(WirelineError::HandlerExists(name.to_string()));
        }
        self.handlers
            .insert(name.to_string(), Arc::new(TypedHandler::new(handler)));
        Ok(())
    }

    /// Add a health probe. Probes run in registration order.
    pub fn register_health_check(&mut self, check: impl HealthCheck + 'static) {
        self.health_checks.push(Box::new(check));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    pub fn health_checks(&self) -> &[Box<dyn HealthCheck>] {
        &self.health_checks
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct SumArgs {
        a: i64,
        b: i64,
    }

    impl Args for SumArgs {
        fn validate(&self) -> crate::Result<()> {
            if self.a == 0 && self.b == 0 {
                return Err(WirelineError::InvalidArgs("a and b can not both be zero".into()));
            }
            Ok(())
        }
    }

    fn sum_registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry
            .register("Service.Sum", |_ctx: ServerContext, _args: SumArgs| async {
                Ok(())
            })
            .unwrap();
        registry
    }

    #[test]
    fn register_and_lookup() {
        let registry = sum_registry();
        assert!(registry.get("Service.Sum").is_some());
        assert!(registry.get("Service.Missing").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = sum_registry();
        let err = registry
            .register("Service.Sum", |_ctx: ServerContext, _args: SumArgs| async {
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, WirelineError::HandlerExists(_)));
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut registry = HandlerRegistry::new();
        let err = registry
            .register("", |_ctx: ServerContext, _args: SumArgs| async { Ok(()) })
            .unwrap_err();
        assert!(matches!(err, WirelineError::EmptyHandlerName));
    }

    #[test]
    fn decode_args_runs_validation() {
        let registry = sum_registry();
        let handler = registry.get("Service.Sum").unwrap();

        assert!(handler.decode_args(br#"{"a":2,"b":3}"#).is_ok());
        assert!(matches!(
            handler.decode_args(br#"{"a":0,"b":0}"#),
            Err(WirelineError::InvalidArgs(_))
        ));
        assert!(matches!(
            handler.decode_args(b"not json"),
            Err(WirelineError::Json(_))
        ));
    }

    #[test]
    fn health_checks_keep_registration_order() {
        let mut registry = HandlerRegistry::new();
        registry.register_health_check(|| Ok(()));
        registry.register_health_check(|| Err(WirelineError::Handler("down".into())));
        assert_eq!(registry.health_checks().len(), 2);
        assert!(registry.health_checks()[0].health_check().is_ok());
        assert!(registry.health_checks()[1].health_check().is_err());
    }
}
