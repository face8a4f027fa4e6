//! # Pipewright - Pipeline-to-Program Compiler
//!
//! Pipewright compiles declarative ETL pipeline documents (JSON step lists with
//! reads, transforms, branches, merges and writes) into standalone Python
//! programs that run the pipeline with polars.
//!
//! ## Quick Start
//!
//! ```
//! use pipewright::pipeline::compile_json;
//!
//! let artifact = compile_json(r#"{"steps": [
//!     {"step": "read", "source": {"type": "csv", "path": "in.csv"}},
//!     {"step": "split", "parallel": true, "branches": [
//!         {"name": "agg", "steps": [{"step": "group", "by": "k", "sum": "v"}]},
//!         {"name": "tx", "steps": [{"step": "filter", "condition": "pl.col(\"v\") < 100"}]}
//!     ]},
//!     {"step": "write", "concurrent_write": true, "target": [
//!         {"type": "csv", "path": "agg.csv", "branch": "agg"},
//!         {"type": "csv", "path": "tx.csv", "branch": "tx"}
//!     ]}
//! ]}"#)?;
//!
//! assert_eq!(
//!     artifact.unit_names,
//!     ["branch_1_agg", "branch_1_tx", "write_1_1", "write_1_2"]
//! );
//! # Ok::<(), pipewright::error::PipelineError>(())
//! ```
//!
//! ## Core Modules
//!
//! - [`pipeline`]: document model, validation and the compiler
//!   - [`pipeline::registry`]: pluggable step emitters
//!   - [`pipeline::plan`]: sequential and thread-pool orchestration
//! - [`config`]: compile options and user settings
//! - [`runner`]: runs generated programs with a Python interpreter
//! - [`error`]: error types and handling utilities
//! - [`logging`]: console and rolling-file logging

#![warn(clippy::all, rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod runner;
