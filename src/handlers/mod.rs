//! Handlers shipped with the server binary.
//!
//! Anything implementing [`crate::dispatch::Handler`] can join the chain;
//! these are the stock ones.

pub mod static_files;

pub use static_files::StaticFiles;
