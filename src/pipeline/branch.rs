//! Compiles one split branch into a standalone unit.
//!
//! The unit receives the incoming dataset, works on its own copy and returns
//! it:
//!
//! ```text
//! def branch_1_agg(df):
//!     df_agg = df.clone()
//!     df_agg = df_agg.group_by(["k"], maintain_order=True).agg([pl.col("v").sum()])
//!     return df_agg
//! ```

use super::assembler::UnitDefinition;
use super::compiler::Session;
use super::plan::BranchCall;
use super::scope::{GLOBAL_DATASET, Scope, result_ident};
use super::spec::Branch;
use crate::error::{Result, StepLocation};

/// Compile `branch` of the split at `location`, hoisting its unit into
/// `session`, and return how to invoke it.
pub(crate) fn compile_branch(
    session: &mut Session<'_>,
    branch: &Branch,
    split_ordinal: usize,
    location: &StepLocation,
) -> Result<BranchCall> {
    let unit = format!("branch_{split_ordinal}_{}", branch.name);
    let mut scope = Scope::branch(&branch.name);

    // A copy, so concurrently running branches never share a dataset.
    let mut body = vec![format!("{} = {GLOBAL_DATASET}.clone()", scope.current())];
    let mut references = Vec::new();

    for (idx, step) in branch.steps.iter().enumerate() {
        let at = location.in_branch(&branch.name, idx);
        let node = session.compile_linear_step(step, &mut scope, &at)?;
        references.extend(node.referenced_units().into_iter().map(str::to_owned));
        body.extend(node.render());
    }
    body.push(format!("return {}", scope.current()));

    tracing::debug!(
        "Compiled branch '{}' of split {split_ordinal} ({} steps)",
        branch.name,
        branch.steps.len()
    );

    session.define(UnitDefinition {
        name: unit.clone(),
        param: GLOBAL_DATASET.to_owned(),
        body,
        references,
    });

    Ok(BranchCall {
        branch: branch.name.clone(),
        unit,
        result: result_ident(&branch.name),
    })
}
