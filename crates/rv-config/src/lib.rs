pub mod binning;
pub mod logging;
pub mod pipeline;
pub mod project;
pub mod rivulet;
mod validate;

pub use binning::BinningConfig;
pub use logging::{LogFormat, LoggingConfig};
pub use pipeline::PipelineConfig;
pub use project::{load_script, load_script_with_env, parse_vars};
pub use rivulet::RivuletConfig;
