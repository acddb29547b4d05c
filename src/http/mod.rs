//! HTTP protocol implementation.
//!
//! One request per connection, no keep-alive, no chunked encoding. Every
//! response carries `Connection: close`.
//!
//! # Architecture
//!
//! - **`connection`**: reads one request, runs the dispatch chain, writes the answer
//! - **`parser`**: raw bytes to an immutable [`request::Environment`]
//! - **`request`**: the environment, methods and protocol versions
//! - **`response`**: status, headers and body (text, chunks or a stream)
//! - **`writer`**: serializes a response, merging default headers
//! - **`status`**: the closed status code table
//! - **`mime`**: content types by file extension
//!
//! # Connection lifecycle
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← buffer until the blank line (+ Content-Length for POST/PUT)
//!        └──────┬──────┘
//!               │ Environment built
//!               ▼
//!        ┌──────────────────┐
//!        │   Dispatching    │ ← first handler with an answer wins, else 404
//!        └──────┬───────────┘
//!               │ Response / raw message
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← head, then body unless the request was HEAD
//!        └──────┬───────────┘
//!               ▼
//!             Closed
//! ```
//!
//! A parse failure skips dispatching and is answered with 400 (505 for an
//! unsupported version, 501 for an unknown method).

pub mod connection;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod status;
pub mod writer;
