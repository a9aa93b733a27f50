use std::fmt;

use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Error)]
pub enum ProvenanceError {
    #[error("Parse error: {0}")]
    Parse(String),
    /// The instrumentation does not understand a construct (unknown operator, assignment
    /// target kind or node shape). Never recovered from.
    #[error("Unsupported construct: {0}")]
    Unsupported(String),
    #[error("Runtime error: {0}")]
    Runtime(String),
    #[error("Uncaught exception: {0}")]
    Thrown(ThrownValue),
    #[error("Execution exceeded step limit")]
    StepLimit,
    #[error("Maximum call depth exceeded")]
    CallDepth,
}

impl ProvenanceError {
    /// Whether a `try`/`catch` in the executed program may observe this error.
    pub fn is_catchable(&self) -> bool {
        matches!(self, Self::Runtime(_) | Self::Thrown(_))
    }

    /// The value a `catch` binder receives for this error.
    pub(crate) fn into_caught_value(self) -> Value {
        match self {
            Self::Thrown(ThrownValue(value)) => value,
            other => Value::String(other.to_string()),
        }
    }
}

/// A program value raised with `throw`.
#[derive(Debug, Clone)]
pub struct ThrownValue(pub Value);

impl fmt::Display for ThrownValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_display_string())
    }
}

pub type ProvenanceResult<T> = Result<T, ProvenanceError>;
