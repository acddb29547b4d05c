//! forkserve - preforking HTTP server
//!
//! A supervisor process binds one listening socket and forks a pool of
//! workers that each serve one connection at a time.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod http;
pub mod server;
