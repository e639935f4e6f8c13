//! Method registry and middleware chain definition.
//!
//! A [`Router`] is assembled once through [`RouterBuilder`] and handed to the server.
//! It is immutable afterwards: no method or middleware can be added while serving.

use crate::context::{Context, Handler};
use std::collections::HashMap;
use std::sync::Arc;

/// Builder collecting methods and middleware before the server starts.
#[derive(Default)]
pub struct RouterBuilder {
    methods: HashMap<String, Handler>,
    middlewares: Vec<Handler>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method handler. Registering the same name twice replaces the handler.
    pub fn register<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        let name = name.into();
        if self.methods.insert(name.clone(), Arc::new(handler)).is_some() {
            tracing::warn!("Method '{}' registered twice, keeping the latest handler", name);
        }
        self
    }

    /// Appends a middleware. Middleware run in registration order before the handler.
    pub fn use_middleware<F>(mut self, middleware: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Appends several middleware in order.
    pub fn use_middlewares<I>(mut self, middlewares: I) -> Self
    where
        I: IntoIterator<Item = Handler>,
    {
        self.middlewares.extend(middlewares);
        self
    }

    pub fn build(self) -> Router {
        Router {
            methods: self.methods,
            middlewares: self.middlewares.into(),
        }
    }
}

/// Immutable method registry plus the shared middleware sequence.
pub struct Router {
    methods: HashMap<String, Handler>,
    middlewares: Arc<[Handler]>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Returns the full chain for `method`: every middleware followed by the handler,
    /// or `None` if the method is not registered.
    pub fn resolve(&self, method: &str) -> Option<Vec<Handler>> {
        let handler = self.methods.get(method)?;
        let mut chain = Vec::with_capacity(self.middlewares.len() + 1);
        chain.extend(self.middlewares.iter().cloned());
        chain.push(handler.clone());
        Some(chain)
    }

    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn middleware_count(&self) -> usize {
        self.middlewares.len()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("methods", &self.methods())
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_resolve_appends_handler() {
        let router = Router::builder()
            .use_middleware(|ctx| ctx.next())
            .use_middleware(|ctx| ctx.next())
            .register("greet", |ctx| ctx.write_string("hi"))
            .build();

        let chain = router.resolve("greet").unwrap();
        assert_eq!(chain.len(), 3);
        assert!(router.resolve("missing").is_none());

        let mut ctx = Context::new("greet", Bytes::new(), Arc::default(), chain);
        ctx.next();
        assert_eq!(ctx.output(), b"hi");
    }

    #[test]
    fn test_methods_listing() {
        let router = Router::builder()
            .register("b", |_| {})
            .register("a", |_| {})
            .build();
        assert_eq!(router.methods(), vec!["a", "b"]);
        assert!(router.contains("a"));
        assert!(!router.contains("c"));
        assert_eq!(router.middleware_count(), 0);
    }

    #[test]
    fn test_register_replaces() {
        let router = Router::builder()
            .register("m", |ctx| ctx.write_string("old"))
            .register("m", |ctx| ctx.write_string("new"))
            .build();

        let mut ctx = Context::new("m", Bytes::new(), Arc::default(), router.resolve("m").unwrap());
        ctx.next();
        assert_eq!(ctx.output(), b"new");
    }

    #[test]
    fn test_use_middlewares_in_order() {
        let first: Handler = Arc::new(|ctx: &mut Context| {
            let mut out = ctx.output().to_vec();
            out.push(b'1');
            ctx.write(out);
        });
        let second: Handler = Arc::new(|ctx: &mut Context| {
            let mut out = ctx.output().to_vec();
            out.push(b'2');
            ctx.write(out);
        });
        let router = Router::builder()
            .use_middlewares(vec![first, second])
            .register("m", |ctx| {
                let mut out = ctx.output().to_vec();
                out.push(b'h');
                ctx.write(out);
            })
            .build();

        let mut ctx = Context::new("m", Bytes::new(), Arc::default(), router.resolve("m").unwrap());
        ctx.next();
        assert_eq!(ctx.output(), b"12h");
    }
}
