pub mod breaker;
pub mod collab;
pub mod config;
pub mod consensus;
pub mod context;
pub mod decision;
pub mod dispatch;
pub mod error;
pub mod io;
pub mod orchestrator;
pub mod protocol;
pub mod rate_limit;
pub mod tools;
pub mod tracer;
pub mod truncate;
pub mod trust;

pub use context::AppContext;
pub use error::{GateError, Result};
