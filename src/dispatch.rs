//! Ordered handler chain.
//!
//! Handlers never know about each other: each one either answers a request
//! or passes with [`Outcome::NoMatch`], and the first answer wins. Running off
//! the end of the chain is a 404.

use crate::http::request::Environment;
use crate::http::response::Response;
use crate::http::status::StatusCode;
use bytes::Bytes;
use std::panic::{AssertUnwindSafe, catch_unwind};
use thiserror::Error;

/// What a handler made of a request.
#[derive(Debug)]
pub enum Outcome {
    /// Not mine; try the next handler
    NoMatch,
    Response(Response),
    /// A complete, pre-rendered HTTP message written verbatim
    RawMessage(Bytes),
}

impl From<Response> for Outcome {
    fn from(response: Response) -> Self {
        Outcome::Response(response)
    }
}

/// Anything that can answer a request.
///
/// Closures of the form `Fn(&Environment) -> anyhow::Result<Outcome>`
/// implement this directly.
pub trait Handler {
    fn call(&self, env: &Environment) -> anyhow::Result<Outcome>;
}

impl<F> Handler for F
where
    F: Fn(&Environment) -> anyhow::Result<Outcome>,
{
    fn call(&self, env: &Environment) -> anyhow::Result<Outcome> {
        self(env)
    }
}

/// A handler failure that names the status to answer with. Other errors
/// are answered with 500.
#[derive(Debug, Error)]
#[error("{status}: {message}")]
pub struct HandlerError {
    pub status: StatusCode,
    pub message: String,
}

impl HandlerError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Status for a failed handler: the declared one, or 500.
pub fn error_status(err: &anyhow::Error) -> StatusCode {
    err.downcast_ref::<HandlerError>()
        .map(|e| e.status)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

#[derive(Default)]
pub struct DispatchChain {
    handlers: Vec<Box<dyn Handler>>,
}

impl DispatchChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler; it runs after every handler added before it.
    pub fn push<H>(&mut self, handler: H)
    where
        H: Handler + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    pub fn with<H>(mut self, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        self.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the chain. Never returns [`Outcome::NoMatch`].
    ///
    /// A panicking handler is reported as an error like any other failure so
    /// the worker survives it.
    pub fn dispatch(&self, env: &Environment) -> anyhow::Result<Outcome> {
        for (index, handler) in self.handlers.iter().enumerate() {
            let result = catch_unwind(AssertUnwindSafe(|| handler.call(env)))
                .unwrap_or_else(|_| Err(anyhow::anyhow!("handler {index} panicked")));

            match result? {
                Outcome::NoMatch => continue,
                outcome => return Ok(outcome),
            }
        }

        Ok(Outcome::Response(Response::not_found()))
    }
}
