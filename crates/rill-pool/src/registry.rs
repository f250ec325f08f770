//! Callable registry.
//!
//! The pipeline compiler (out of scope) resolves every call site to a fully
//! qualified name at graph-build time; the registry maps those names to the
//! actual function bodies. The engine never reflects over a callable; it
//! only invokes it with a fixed argument list.

use std::collections::HashMap;
use std::sync::Arc;

use rill_types::Value;

use crate::error::CallError;

/// Arguments for one invocation, fully resolved (no node references left).
#[derive(Debug, Clone)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keyword: Vec<(String, Value)>,
}

impl CallArgs {
    /// Keyword argument by name.
    pub fn keyword_arg(&self, name: &str) -> Option<&Value> {
        self.keyword
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }
}

pub type CallableFn = dyn Fn(&CallArgs) -> std::result::Result<Value, CallError> + Send + Sync;

/// Immutable once built: the front-end registers everything before the pool
/// starts, workers only resolve.
pub struct CallableRegistry {
    callables: HashMap<String, Arc<CallableFn>>,
    warmup: Option<Box<dyn Fn() + Send + Sync>>,
}

impl CallableRegistry {
    pub fn new() -> Self {
        Self {
            callables: HashMap::new(),
            warmup: None,
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, callable: F)
    where
        F: Fn(&CallArgs) -> std::result::Result<Value, CallError> + Send + Sync + 'static,
    {
        self.callables.insert(name.into(), Arc::new(callable));
    }

    /// Hook run once per worker before its first job, so cold-start cost is
    /// paid at pool start-up instead of on the first pipeline call.
    pub fn register_warmup<F>(&mut self, warmup: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.warmup = Some(Box::new(warmup));
    }

    pub fn resolve(&self, name: &str) -> std::result::Result<Arc<CallableFn>, CallError> {
        self.callables
            .get(name)
            .cloned()
            .ok_or_else(|| CallError::UnknownCallable(name.to_string()))
    }

    pub fn warmup(&self) {
        if let Some(warmup) = &self.warmup {
            warmup();
        }
    }

    pub fn len(&self) -> usize {
        self.callables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callables.is_empty()
    }
}

impl Default for CallableRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_resolve() {
        let mut registry = CallableRegistry::new();
        registry.register("identity", |args: &CallArgs| {
            Ok(args.positional[0].clone())
        });

        let callable = registry.resolve("identity").unwrap();
        let args = CallArgs {
            positional: vec![Value::Int(5)],
            keyword: vec![],
        };
        assert_eq!(callable(&args).unwrap(), Value::Int(5));
    }

    #[test]
    fn unknown_callable_is_an_error() {
        let registry = CallableRegistry::new();
        assert!(matches!(
            registry.resolve("missing"),
            Err(CallError::UnknownCallable(_))
        ));
    }

    #[test]
    fn keyword_arg_lookup() {
        let args = CallArgs {
            positional: vec![],
            keyword: vec![("n".into(), Value::Int(3))],
        };
        assert_eq!(args.keyword_arg("n"), Some(&Value::Int(3)));
        assert_eq!(args.keyword_arg("m"), None);
    }
}
