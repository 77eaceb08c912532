mod error;
mod expr_parser;
pub mod literals;
mod logic;
pub mod parse_utils;
mod pipeline_parser;
pub mod prepass;
pub mod preprocess;
mod program;

pub use error::{ParseError, Position, Span};
pub use expr_parser::compile_expr;
pub use literals::{Extracted, OffsetMap, extract_literals};
pub use logic::{Logic, VarRef};
pub use pipeline_parser::parse_pipeline;
pub use prepass::rewrite_structures;
pub use preprocess::{PreprocessError, preprocess_vars, preprocess_vars_with_env};
pub use program::{
    ForkBlock, JoinStrategy, MergeStrategy, Program, SplitBlock, StageDesc, StageMode, Step,
};
