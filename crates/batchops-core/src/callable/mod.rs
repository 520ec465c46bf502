//! Callable registry
//!
//! Jobs reference their entry point by a symbolic `namespace.function`
//! name resolved through this process-local registry, populated once at
//! startup. No runtime reflection: an unknown name is a permanent
//! failure (exit code 2), never retried.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

use crate::engine::EngineDeps;
use crate::{Error, Result};

/// Symbolic name of the pipeline executor callable
pub const PIPELINE_CALLABLE: &str = "pipeline.process_upload";

/// Symbolic name of the department feed ingest generator
pub const INGEST_CALLABLE: &str = "ingest.department_feed";

lazy_static! {
    static ref CALLABLE_NAME: Regex =
        Regex::new(r"^[a-z_][a-z0-9_]*\.[a-z_][a-z0-9_]*$").unwrap();
}

/// Context handed to every callable invocation
#[derive(Debug, Clone)]
pub struct JobContext {
    /// The run recording this invocation
    pub job_run_id: Uuid,

    pub job_id: Uuid,

    pub job_name: String,

    pub claimed_at: DateTime<Utc>,
}

/// Type alias for the boxed async entry point
pub type BoxedCallable = Box<
    dyn Fn(
            Vec<Value>,
            Map<String, Value>,
            JobContext,
            Arc<EngineDeps>,
        ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>>
        + Send
        + Sync,
>;

/// Registry mapping symbolic names to entry points
#[derive(Default)]
pub struct CallableRegistry {
    entries: HashMap<String, BoxedCallable>,
}

impl CallableRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Bind a `namespace.function` name to an entry point
    pub fn register<F, Fut>(&mut self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(Vec<Value>, Map<String, Value>, JobContext, Arc<EngineDeps>) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if !CALLABLE_NAME.is_match(name) {
            return Err(Error::callable(format!(
                "invalid callable name '{}', expected namespace.function",
                name
            )));
        }

        let boxed: BoxedCallable =
            Box::new(move |args, kwargs, ctx, deps| Box::pin(handler(args, kwargs, ctx, deps)));
        self.entries.insert(name.to_string(), boxed);

        Ok(())
    }

    /// Check whether a name is bound
    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All registered names
    pub fn registered_names(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Invoke a callable by name. An unknown name is the caller's signal
    /// for a permanent, non-retried failure.
    pub async fn call(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        ctx: JobContext,
        deps: Arc<EngineDeps>,
    ) -> Result<Value> {
        let handler = self
            .entries
            .get(name)
            .ok_or_else(|| Error::callable(format!("unknown callable '{}'", name)))?;

        handler(args, kwargs, ctx, deps).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(
        _args: Vec<Value>,
        _kwargs: Map<String, Value>,
        _ctx: JobContext,
        _deps: Arc<EngineDeps>,
    ) -> Result<Value> {
        Ok(Value::Null)
    }

    #[test]
    fn test_register_validates_name() {
        let mut registry = CallableRegistry::new();
        assert!(registry.register("pipeline.process_upload", noop).is_ok());
        assert!(registry.register("no_namespace", noop).is_err());
        assert!(registry.register("Bad.Case", noop).is_err());

        assert!(registry.is_registered("pipeline.process_upload"));
        assert!(!registry.is_registered("no_namespace"));
    }
}
