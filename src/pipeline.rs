//! Pipeline document to Python program compiler.
//!
//! A pipeline document is a JSON object whose `steps` list declares reads,
//! transforms (`filter`, `join`, `group`), splits into named branches, merges
//! and writes. Compilation turns it into one self-contained Python program
//! for the polars runtime:
//!
//! - **Split branches** become standalone functions (`branch_<n>_<name>`) that
//!   work on a copy of the incoming dataset, invoked in order or through a
//!   bounded thread pool (`parallel: true`).
//! - **Concurrent writes** (`concurrent_write: true` with several targets)
//!   become one function per target, all awaited before the step completes.
//! - Every function is defined before `main()` references it.
//!
//! # Example
//!
//! ```
//! use pipewright::pipeline::Compiler;
//!
//! let artifact = Compiler::with_defaults().compile_json(
//!     r#"{
//!         "name": "orders",
//!         "steps": [
//!             {"step": "read", "source": {"type": "csv", "path": "orders.csv"}},
//!             {"step": "filter", "column": "amount", "operator": ">", "value": 0},
//!             {"step": "write", "target": {"type": "csv", "path": "clean.csv"}}
//!         ]
//!     }"#,
//! )?;
//!
//! let program = artifact.render();
//! assert!(program.contains("df = df.filter(pl.col(\"amount\") > 0)"));
//! # Ok::<(), pipewright::error::PipelineError>(())
//! ```
//!
//! # Step kinds
//!
//! Step and endpoint kinds are resolved through an [`EmitterRegistry`]. The
//! built-in registry handles `csv` and `database` (alias `mariadb`) endpoints
//! plus the `filter`, `join`, `group` and `merge` steps; custom emitters can be
//! registered alongside or instead of them.

pub mod assembler;
mod branch;
pub mod compiler;
pub mod fragment;
pub mod plan;
mod polars;
pub mod registry;
pub mod scope;
pub mod spec;
pub mod validation;

pub use assembler::{CompiledArtifact, UnitDefinition};
pub use compiler::Compiler;
pub use plan::{BranchCall, ExecutionMode, PlanNode, WriteCall};
pub use registry::{Descriptor, EmitContext, EmitterKey, EmitterRegistry, StepEmitter};
pub use spec::{Branch, Endpoint, PipelineSpec, SPEC_VERSION, Step, Transform};
pub use validation::validate_pipeline;

/// Compile a JSON pipeline document with the built-in emitters.
pub fn compile_json(json: &str) -> crate::error::Result<CompiledArtifact> {
    Compiler::with_defaults().compile_json(json)
}
