use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};
use rv_lang::{ParseError, Span};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum CoreReason {
    #[error("pipeline parse error")]
    Parse,
    #[error("pipeline build error")]
    Build,
    #[error("pipeline execution error")]
    Exec,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for CoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Parse => 1001,
            Self::Build => 1002,
            Self::Exec => 1003,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type CoreError = StructError<CoreReason>;
pub type CoreResult<T> = Result<T, CoreError>;

// ---------------------------------------------------------------------------
// Evaluation errors (run time, travel as stream items)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("{method}: {message}")]
    Method { method: String, message: String },
    #[error("stage '{stage}' received a sub-stream where it expected a value")]
    UnexpectedGroup { stage: String },
    #[error("stage '{stage}' must emit sub-streams to open a block")]
    ExpectedGroup { stage: String },
    #[error("join failed: {0}")]
    Join(String),
    #[error("no value arrived within {0:?}")]
    Timeout(std::time::Duration),
    #[error("no subject named '{0}'")]
    UnknownSubject(String),
    #[error("{0}")]
    Other(String),
}

impl EvalError {
    pub fn method(method: &str, message: impl Into<String>) -> Self {
        EvalError::Method {
            method: method.to_string(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Build errors (compile time)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("unknown operator '{name}' at {span}")]
    UnknownOperator { name: String, span: Span },
    #[error("unknown method '{name}'")]
    UnknownMethod { name: String },
    #[error("operator '{operator}' requires arguments")]
    MissingArguments { operator: String },
    #[error("operator '{operator}' needs at least {min} arguments, got {got}")]
    InsufficientArguments {
        operator: String,
        min: usize,
        got: usize,
    },
    #[error("operator '{operator}' takes at most {max} arguments, got {got}")]
    TooManyArguments {
        operator: String,
        max: usize,
        got: usize,
    },
    #[error(
        "Do not use the typical \"@\" operator in a reducer. Use $.current and $.accumulator. (operator '{operator}')"
    )]
    ContextMisuse { operator: String },
    #[error("operator '{operator}' does not take a reducer; remove the '!' prefix")]
    NotAReducer { operator: String },
    #[error("method '{name}' is asynchronous and cannot be used in a synchronous stage")]
    AsyncMethod { name: String },
    #[error("asynchronous method '{name}' cannot be nested inside '{within}'")]
    AsyncInLazy { name: String, within: String },
    #[error("operator '{operator}' runs synchronously and cannot take an asynchronous function")]
    AsyncStage { operator: String },
    #[error("invalid argument for '{operator}': {message}")]
    InvalidArgument { operator: String, message: String },
    #[error("invalid default expression: {0}")]
    Default(ParseError),
    #[error("build-time evaluation failed: {0}")]
    Eval(#[from] EvalError),
}

impl BuildError {
    pub fn invalid(operator: &str, message: impl Into<String>) -> Self {
        BuildError::InvalidArgument {
            operator: operator.to_string(),
            message: message.into(),
        }
    }
}
