//! Centralized error handling for pipewright.
//!
//! Compilation is fail-fast: the first violation found while validating or
//! compiling a pipeline document aborts the whole compilation and surfaces as
//! one of the variants below. No partial artifact is ever returned.
//!
//! ## Locating the offending step
//!
//! Every step-level error carries a [`StepLocation`] so messages read like
//! `step 3, branch 'agg', step 1: unknown step kind 'pivot'`:
//!
//! ```
//! use pipewright::error::{PipelineError, StepLocation};
//!
//! let err = PipelineError::UnknownStep {
//!     kind: "pivot".to_owned(),
//!     location: StepLocation::top(2).in_branch("agg", 0),
//! };
//! assert_eq!(
//!     err.to_string(),
//!     "Unknown step error at step 3, branch 'agg', step 1: unknown step kind 'pivot'"
//! );
//! ```
//!
//! ## Context Extension Trait
//!
//! The `ResultExt` trait adds `.context()` to any `Result` whose error converts
//! into [`PipelineError`]:
//!
//! ```no_run
//! use pipewright::error::ResultExt as _;
//! use std::fs;
//!
//! fn load_spec() -> pipewright::error::Result<String> {
//!     let raw = fs::read_to_string("pipeline.json").context("Failed to read pipeline document")?;
//!     Ok(raw)
//! }
//! ```

use std::fmt;

/// Position of a step inside a pipeline document.
///
/// Indices are stored zero-based and displayed one-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepLocation {
    pub index: usize,
    pub branch: Option<BranchLocation>,
}

/// Position of a step nested in a split branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchLocation {
    pub name: String,
    pub index: usize,
}

impl StepLocation {
    /// A top-level step.
    pub fn top(index: usize) -> Self {
        Self {
            index,
            branch: None,
        }
    }

    /// The `index`-th step of branch `name` inside this (split) step.
    pub fn in_branch(&self, name: impl Into<String>, index: usize) -> Self {
        Self {
            index: self.index,
            branch: Some(BranchLocation {
                name: name.into(),
                index,
            }),
        }
    }

    /// Name of the enclosing branch, if any.
    pub fn branch_name(&self) -> Option<&str> {
        self.branch.as_ref().map(|b| b.name.as_str())
    }
}

impl fmt::Display for StepLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {}", self.index + 1)?;
        if let Some(branch) = &self.branch {
            write!(f, ", branch '{}', step {}", branch.name, branch.index + 1)?;
        }
        Ok(())
    }
}

/// Which side of the pipeline an endpoint sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    Source,
    Target,
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Target => write!(f, "target"),
        }
    }
}

/// Main error type for pipewright operations.
#[derive(Debug)]
pub enum PipelineError {
    /// Missing or malformed top-level structure (e.g. no `steps` key)
    Configuration { key: String, message: String },

    /// Unrecognized step kind
    UnknownStep { kind: String, location: StepLocation },

    /// Unrecognized source or target kind
    UnknownEndpoint {
        kind: String,
        role: EndpointRole,
        location: StepLocation,
    },

    /// A recognized step whose parameters are structurally invalid
    InvalidStep {
        location: StepLocation,
        message: String,
    },

    /// Two branches of one split share a name
    DuplicateBranch { name: String, location: StepLocation },

    /// A write or merge references a branch the preceding split never declared
    UnknownBranch { name: String, location: StepLocation },

    /// The assembled artifact would reference a unit before defining it
    Assembly(String),

    /// I/O errors (reading documents, writing artifacts)
    Io(std::io::Error),

    /// Generated program failed when executed
    Execution(String),

    /// Generic error with context
    Other(String),
}

impl PipelineError {
    pub fn configuration(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn invalid_step(location: &StepLocation, message: impl Into<String>) -> Self {
        Self::InvalidStep {
            location: location.clone(),
            message: message.into(),
        }
    }

    /// True for errors raised while validating or compiling a document.
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::UnknownStep { .. }
                | Self::UnknownEndpoint { .. }
                | Self::InvalidStep { .. }
                | Self::DuplicateBranch { .. }
                | Self::UnknownBranch { .. }
                | Self::Assembly(_)
        )
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { key, message } => {
                write!(f, "Configuration error in '{key}': {message}")
            }
            Self::UnknownStep { kind, location } => {
                write!(
                    f,
                    "Unknown step error at {location}: unknown step kind '{kind}'"
                )
            }
            Self::UnknownEndpoint {
                kind,
                role,
                location,
            } => write!(
                f,
                "Unknown endpoint error at {location}: unknown {role} type '{kind}'"
            ),
            Self::InvalidStep { location, message } => {
                write!(f, "Invalid step at {location}: {message}")
            }
            Self::DuplicateBranch { name, location } => {
                write!(f, "Invalid step at {location}: duplicate branch name '{name}'")
            }
            Self::UnknownBranch { name, location } => write!(
                f,
                "Invalid step at {location}: branch '{name}' is not declared by the preceding split"
            ),
            Self::Assembly(msg) => write!(f, "Assembly error: {msg}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Execution(msg) => write!(f, "Pipeline execution error: {msg}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration("<document>", format!("JSON error: {err}"))
    }
}

/// Result type alias for pipewright operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait to add context to results.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Add context using a closure (lazy evaluation).
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<PipelineError>,
{
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err: PipelineError = e.into();
            PipelineError::Other(format!("{}: {}", msg.into(), err))
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err: PipelineError = e.into();
            PipelineError::Other(format!("{}: {}", f(), err))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display() {
        assert_eq!(StepLocation::top(0).to_string(), "step 1");
        assert_eq!(
            StepLocation::top(4).in_branch("tx", 1).to_string(),
            "step 5, branch 'tx', step 2"
        );
    }

    #[test]
    fn test_unknown_endpoint_display() {
        let err = PipelineError::UnknownEndpoint {
            kind: "ftp".to_owned(),
            role: EndpointRole::Source,
            location: StepLocation::top(0),
        };
        assert_eq!(
            err.to_string(),
            "Unknown endpoint error at step 1: unknown source type 'ftp'"
        );
        assert!(err.is_compile_error());
    }

    #[test]
    fn test_configuration_display() {
        let err = PipelineError::configuration("steps", "missing required key");
        assert_eq!(
            err.to_string(),
            "Configuration error in 'steps': missing required key"
        );
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "pipeline.json",
        ));

        let result: Result<()> = result.context("Failed to read pipeline document");
        let err = result.unwrap_err();
        assert!(!err.is_compile_error());
        assert!(err.to_string().contains("Failed to read pipeline document"));
    }
}
