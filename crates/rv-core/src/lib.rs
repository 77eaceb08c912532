pub mod bins;
pub mod engine;
pub mod error;
pub mod joins;
pub mod operator;
pub mod pipeline;
pub mod stream;
pub mod value;

pub use engine::{Engine, Scope};
pub use error::{BuildError, CoreError, CoreReason, CoreResult, EvalError};
pub use operator::{DeclOptions, OperatorKind, Registry};
pub use pipeline::{Pipeline, PipelineOptions};
