//! Composes the final program: preamble, hoisted units, `main`, entry guard.

use super::fragment::py_str;
use super::plan::{POOL_SIZE, PlanNode, indent};
use crate::error::{PipelineError, Result};
use std::collections::BTreeSet;
use std::fmt;

/// A callable emitted once at program-definition level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDefinition {
    pub name: String,
    pub param: String,
    pub body: Vec<String>,
    /// Other units this one invokes
    pub references: Vec<String>,
}

impl UnitDefinition {
    pub fn render(&self) -> String {
        let mut lines = vec![format!("def {}({}):", self.name, self.param)];
        lines.extend(indent(&body_or_pass(&self.body), 1));
        lines.join("\n")
    }
}

/// The generated program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    pub preamble: String,
    pub unit_definitions: Vec<String>,
    pub unit_names: Vec<String>,
    /// One entry per top-level compiled fragment, unindented
    pub main_body: Vec<String>,
}

impl CompiledArtifact {
    /// The complete program text.
    pub fn render(&self) -> String {
        let mut sections = vec![self.preamble.clone()];
        sections.extend(self.unit_definitions.iter().cloned());

        let main_lines: Vec<String> = self
            .main_body
            .iter()
            .flat_map(|fragment| fragment.lines().map(str::to_owned))
            .collect();
        let mut main = vec!["def main():".to_owned()];
        main.extend(indent(&body_or_pass(&main_lines), 1));
        sections.push(main.join("\n"));

        sections.push("if __name__ == \"__main__\":\n    main()".to_owned());

        let mut program = sections.join("\n\n\n");
        program.push('\n');
        program
    }
}

impl fmt::Display for CompiledArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Fixed program preamble.
pub fn preamble(pipeline_name: &str, threads: usize) -> String {
    format!(
        r#"{docstring}
from concurrent.futures import ThreadPoolExecutor

import polars as pl

{POOL_SIZE} = {threads}"#,
        docstring = py_str(&format!("Generated pipeline: {pipeline_name}"))
    )
}

/// Assemble the artifact, checking that every unit is defined before use.
///
/// # Errors
///
/// `Assembly` when a unit is referenced before its definition or defined twice.
pub fn assemble(
    pipeline_name: &str,
    threads: usize,
    units: &[UnitDefinition],
    main: &[PlanNode],
) -> Result<CompiledArtifact> {
    let mut defined: BTreeSet<&str> = BTreeSet::new();
    for unit in units {
        if let Some(missing) = unit
            .references
            .iter()
            .find(|r| !defined.contains(r.as_str()))
        {
            return Err(PipelineError::Assembly(format!(
                "unit '{}' references '{missing}' before its definition",
                unit.name
            )));
        }
        if !defined.insert(&unit.name) {
            return Err(PipelineError::Assembly(format!(
                "unit '{}' is defined twice",
                unit.name
            )));
        }
    }

    for node in main {
        if let Some(missing) = node
            .referenced_units()
            .into_iter()
            .find(|r| !defined.contains(r))
        {
            return Err(PipelineError::Assembly(format!(
                "main references undefined unit '{missing}'"
            )));
        }
    }

    Ok(CompiledArtifact {
        preamble: preamble(pipeline_name, threads),
        unit_definitions: units.iter().map(UnitDefinition::render).collect(),
        unit_names: units.iter().map(|u| u.name.clone()).collect(),
        main_body: main.iter().map(|node| node.render().join("\n")).collect(),
    })
}

fn body_or_pass(lines: &[String]) -> Vec<String> {
    if lines.iter().all(|l| l.trim().is_empty()) {
        vec!["pass".to_owned()]
    } else {
        lines.to_vec()
    }
}
