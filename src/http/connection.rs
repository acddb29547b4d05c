use bytes::BytesMut;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::dispatch::{DispatchChain, Outcome, error_status};
use crate::http::parser::{MAX_BODY_BYTES, ParseError, parse_head};
use crate::http::request::{ConnectionInfo, Environment};
use crate::http::response::Response;
use crate::http::status::StatusCode;
use crate::http::writer::ResponseWriter;

const READ_CHUNK: usize = 4096;

/// One accepted connection: exactly one request, one response, then close.
pub struct Connection<S> {
    stream: S,
    buffer: BytesMut,
    info: ConnectionInfo,
    read_timeout: Duration,
    max_body: usize,
}

/// What happened on a connection, for the access log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub method: Option<&'static str>,
    pub path: Option<String>,
    pub status: Option<u16>,
    pub body_bytes: u64,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, info: ConnectionInfo, read_timeout: Duration) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            info,
            read_timeout,
            max_body: MAX_BODY_BYTES,
        }
    }

    /// Largest `Content-Length` accepted; longer bodies are refused with 413.
    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    /// Reads, dispatches and answers one request. Protocol and handler
    /// failures are answered on the wire; only I/O errors on the socket
    /// itself come back as `Err`.
    pub async fn run(&mut self, chain: &DispatchChain) -> anyhow::Result<Exchange> {
        let started = Instant::now();

        let env = match tokio::time::timeout(self.read_timeout, self.read_request()).await {
            Ok(Ok(Some(env))) => env,
            Ok(Ok(None)) => {
                tracing::debug!(peer = %self.info.remote_addr, "peer closed before sending a request");
                self.stream.shutdown().await.ok();
                return Ok(Exchange::empty());
            }
            Ok(Err(e)) => {
                tracing::warn!(peer = %self.info.remote_addr, error = %e, "rejecting request");
                return self.respond_error(e.status()).await;
            }
            Err(_) => {
                tracing::warn!(peer = %self.info.remote_addr, "timed out reading request");
                return self.respond_error(StatusCode::REQUEST_TIMEOUT).await;
            }
        };

        let mut exchange = Exchange {
            method: Some(env.method().as_str()),
            path: Some(env.path().to_string()),
            status: None,
            body_bytes: 0,
        };

        match chain.dispatch(&env) {
            Ok(Outcome::Response(response)) => {
                exchange.status = Some(response.status.as_u16());
                exchange.body_bytes = self.write_response(response, &env).await?;
            }
            Ok(Outcome::RawMessage(raw)) => {
                self.stream.write_all(&raw).await?;
                self.stream.flush().await?;
                exchange.body_bytes = raw.len() as u64;
            }
            Ok(Outcome::NoMatch) => {
                exchange.status = Some(StatusCode::NOT_FOUND.as_u16());
                exchange.body_bytes = self.write_response(Response::not_found(), &env).await?;
            }
            Err(e) => {
                let status = error_status(&e);
                tracing::error!(
                    method = env.method().as_str(),
                    path = env.path(),
                    status = status.as_u16(),
                    error = ?e,
                    "handler failed"
                );
                exchange.status = Some(status.as_u16());
                exchange.body_bytes = self.write_response(Response::error(status), &env).await?;
            }
        }

        self.stream.shutdown().await.ok();

        tracing::info!(
            peer = %self.info.remote_addr,
            method = exchange.method.unwrap_or("-"),
            path = exchange.path.as_deref().unwrap_or("-"),
            status = exchange.status.unwrap_or(0),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request served"
        );

        Ok(exchange)
    }

    /// Reads until a whole request (head plus any POST/PUT body) is
    /// buffered. `Ok(None)` means the peer closed without sending anything.
    ///
    /// The head is parsed once; after that the body is read straight into
    /// a buffer sized for the declared length.
    pub async fn read_request(&mut self) -> Result<Option<Environment>, ParseError> {
        let head = loop {
            match parse_head(&self.buffer, self.max_body) {
                Ok(head) => break head,
                Err(ParseError::Incomplete) => {}
                Err(e) => return Err(e),
            }
            if !self.fill().await? {
                return self.closed_early();
            }
        };

        let total = head.total_len();
        if self.buffer.len() < total {
            self.buffer.reserve(total - self.buffer.len());
        }
        while self.buffer.len() < total {
            if !self.fill().await? {
                return self.closed_early();
            }
        }

        let env = head.finish(&self.buffer, &self.info)?;
        let _ = self.buffer.split_to(total);
        Ok(Some(env))
    }

    /// One read from the peer appended to the buffer; `false` at end of stream.
    async fn fill(&mut self) -> Result<bool, ParseError> {
        if self.buffer.capacity() - self.buffer.len() < READ_CHUNK {
            self.buffer.reserve(READ_CHUNK);
        }
        let n = self
            .stream
            .read_buf(&mut self.buffer)
            .await
            .map_err(|e| ParseError::Malformed(format!("read failed: {e}")))?;
        Ok(n > 0)
    }

    fn closed_early(&self) -> Result<Option<Environment>, ParseError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        Err(ParseError::Malformed(
            "connection closed before the message was complete".into(),
        ))
    }

    async fn write_response(&mut self, response: Response, env: &Environment) -> anyhow::Result<u64> {
        ResponseWriter::new(response, env.is_head())
            .write_to_stream(&mut self.stream)
            .await
    }

    async fn respond_error(&mut self, status: StatusCode) -> anyhow::Result<Exchange> {
        let written = ResponseWriter::new(Response::error(status), false)
            .write_to_stream(&mut self.stream)
            .await?;
        self.stream.shutdown().await.ok();

        Ok(Exchange {
            method: None,
            path: None,
            status: Some(status.as_u16()),
            body_bytes: written,
        })
    }
}

impl Exchange {
    fn empty() -> Self {
        Self {
            method: None,
            path: None,
            status: None,
            body_bytes: 0,
        }
    }
}
