//! Process pool: the supervisor, its workers and the plumbing between them.

pub mod control;
pub mod listener;
pub mod liveness;
pub mod pidfile;
pub mod pool;
pub mod supervisor;
pub mod worker;

pub use control::ControlHandle;
pub use listener::{ListenAddr, Listener};
pub use supervisor::{State, Supervisor};
