//! Ordered chain-of-responsibility dispatch for inbound requests.
//!
//! Handlers run in registration order. Each one either answers the request or
//! passes it down the chain through [`Next`]; handlers that do not declare
//! the request's type are skipped. A request nobody answers yields
//! [`Dispatch::Unhandled`], and the caller picks the response status.

use crate::core::packet::{RequestFrame, ResponseFrame};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Result of running a request through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Handled(ResponseFrame),
    Unhandled,
}

/// One link of a [`PacketPipeline`].
#[async_trait]
pub trait PacketHandler: Send + Sync {
    /// Request types this handler takes part in.
    fn request_types(&self) -> &[String];

    fn handles(&self, request_type: &str) -> bool {
        self.request_types().iter().any(|t| t == request_type)
    }

    /// Answer `request`, or defer with `next.run(request)`.
    async fn handle(&self, request: &RequestFrame, next: Next<'_>) -> Result<Dispatch>;
}

/// The remainder of the chain after the current handler.
pub struct Next<'a> {
    handlers: &'a [Arc<dyn PacketHandler>],
}

impl<'a> Next<'a> {
    pub async fn run(self, request: &RequestFrame) -> Result<Dispatch> {
        let mut rest = self.handlers;
        while let Some((first, tail)) = rest.split_first() {
            if first.handles(request.request_type()) {
                return first.handle(request, Next { handlers: tail }).await;
            }
            rest = tail;
        }
        Ok(Dispatch::Unhandled)
    }
}

/// Ordered list of request handlers.
#[derive(Clone, Default)]
pub struct PacketPipeline {
    handlers: Vec<Arc<dyn PacketHandler>>,
}

impl PacketPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to the end of the chain.
    pub fn with<H>(mut self, handler: H) -> Self
    where
        H: PacketHandler + 'static,
    {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Append a terminal handler built from a closure.
    pub fn respond<I, S, F>(self, request_types: I, responder: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&RequestFrame) -> Result<ResponseFrame> + Send + Sync + 'static,
    {
        self.with(Responder {
            request_types: request_types.into_iter().map(Into::into).collect(),
            responder: Box::new(responder),
        })
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Every request type some handler declares, in registration order.
    pub fn supported_types(&self) -> Vec<String> {
        let mut types: Vec<String> = Vec::new();
        for t in self.handlers.iter().flat_map(|h| h.request_types()) {
            if !types.contains(t) {
                types.push(t.clone());
            }
        }
        types
    }

    pub async fn dispatch(&self, request: &RequestFrame) -> Result<Dispatch> {
        Next {
            handlers: &self.handlers,
        }
        .run(request)
        .await
    }
}

type ResponderFn = dyn Fn(&RequestFrame) -> Result<ResponseFrame> + Send + Sync + 'static;

struct Responder {
    request_types: Vec<String>,
    responder: Box<ResponderFn>,
}

#[async_trait]
impl PacketHandler for Responder {
    fn request_types(&self) -> &[String] {
        &self.request_types
    }

    async fn handle(&self, request: &RequestFrame, _next: Next<'_>) -> Result<Dispatch> {
        (self.responder)(request).map(Dispatch::Handled)
    }
}

/// Cross-cutting handler that traces every request and its outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl PacketHandler for LoggingHandler {
    fn request_types(&self) -> &[String] {
        &[]
    }

    fn handles(&self, _request_type: &str) -> bool {
        true
    }

    async fn handle(&self, request: &RequestFrame, next: Next<'_>) -> Result<Dispatch> {
        let started = Instant::now();
        let outcome = next.run(request).await;
        let status = match &outcome {
            Ok(Dispatch::Handled(response)) => Some(response.status),
            _ => None,
        };
        debug!(
            request_type = request.request_type(),
            bytes = request.data().len(),
            ?status,
            elapsed_us = started.elapsed().as_micros() as u64,
            "Request dispatched"
        );
        outcome
    }
}
