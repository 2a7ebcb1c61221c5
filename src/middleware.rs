//! Middleware hooks around every client call.
//!
//! Request hooks run in registration order and may rewrite the request.
//! Response hooks run in reverse order, so the first middleware registered sees
//! the final response last. Error hooks observe failures and cannot alter them.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::transport::{Request, Response};
use crate::Error;

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn on_request(&self, req: Request) -> Request {
        req
    }

    async fn on_response(&self, _req: &Request, resp: Response) -> Response {
        resp
    }

    async fn on_error(&self, _req: &Request, _err: &Error) {}
}

/// Ordered list of middleware.
#[derive(Clone, Default)]
pub struct MiddlewarePipeline {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for MiddlewarePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewarePipeline")
            .field("len", &self.middleware.len())
            .finish()
    }
}

impl MiddlewarePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.push(Arc::new(middleware));
        self
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    pub async fn run_request(&self, mut req: Request) -> Request {
        for m in &self.middleware {
            req = m.on_request(req).await;
        }
        req
    }

    pub async fn run_response(&self, req: &Request, mut resp: Response) -> Response {
        for m in self.middleware.iter().rev() {
            resp = m.on_response(req, resp).await;
        }
        resp
    }

    pub async fn run_error(&self, req: &Request, err: &Error) {
        for m in &self.middleware {
            m.on_error(req, err).await;
        }
    }
}

/// Adds fixed headers to every request without overriding ones already set.
#[derive(Debug, Clone, Default)]
pub struct DefaultHeaders {
    headers: HashMap<String, String>,
}

impl DefaultHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl Middleware for DefaultHeaders {
    async fn on_request(&self, mut req: Request) -> Request {
        for (k, v) in &self.headers {
            let present = req.headers.keys().any(|h| h.eq_ignore_ascii_case(k));
            if !present {
                req.headers.insert(k.clone(), v.clone());
            }
        }
        req
    }
}

/// Logs each call through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMiddleware;

#[async_trait]
impl Middleware for TracingMiddleware {
    async fn on_request(&self, req: Request) -> Request {
        debug!(method = %req.method, url = %req.url, "sending request");
        req
    }

    async fn on_response(&self, req: &Request, resp: Response) -> Response {
        debug!(
            method = %req.method,
            url = %req.url,
            status = resp.status,
            bytes = resp.body.len(),
            "request completed"
        );
        resp
    }

    async fn on_error(&self, req: &Request, err: &Error) {
        warn!(method = %req.method, url = %req.url, error = %err, "request failed");
    }
}
