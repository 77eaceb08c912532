#[macro_use]
mod log_macros;

pub mod error;
pub mod session;
pub mod signal;
pub mod tracing_init;

pub use error::{RuntimeError, RuntimeReason, RuntimeResult};
pub use session::{RunStats, Session};
