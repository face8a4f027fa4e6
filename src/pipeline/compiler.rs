//! Pipeline-to-program compiler.
//!
//! Walks the validated step list in declared order. Linear steps are emitted
//! inline through the registry; splits compile each branch into a hoisted unit
//! and plan its invocation; concurrent multi-target writes become hoisted write
//! units submitted to the worker pool. The walk itself is single-threaded and
//! deterministic: compiling the same document twice yields the same bytes.

use super::assembler::{self, CompiledArtifact, UnitDefinition};
use super::branch;
use super::plan::{self, ExecutionMode, PlanNode, WriteCall};
use super::registry::{Descriptor, EmitterRegistry};
use super::scope::Scope;
use super::spec::{Endpoint, PipelineSpec, Step};
use super::validation::validate_pipeline;
use crate::config::CompileOptions;
use crate::error::{PipelineError, Result, StepLocation};

/// Parameter name of generated write units.
const WRITE_PARAM: &str = "data";

#[derive(Debug, Clone)]
pub struct Compiler {
    registry: EmitterRegistry,
    options: CompileOptions,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Compiler {
    pub fn new(registry: EmitterRegistry, options: CompileOptions) -> Self {
        Self { registry, options }
    }

    /// Compiler with the built-in polars emitters and default options.
    pub fn with_defaults() -> Self {
        Self::new(EmitterRegistry::polars(), CompileOptions::default())
    }

    /// Parse and compile a JSON pipeline document.
    pub fn compile_json(&self, json: &str) -> Result<CompiledArtifact> {
        self.compile(&PipelineSpec::from_json(json)?)
    }

    /// Parse and compile an already-decoded pipeline document.
    pub fn compile_document(&self, doc: &serde_json::Value) -> Result<CompiledArtifact> {
        self.compile(&PipelineSpec::from_value(doc)?)
    }

    /// Compile a pipeline spec into a program.
    ///
    /// # Errors
    ///
    /// The first validation or emission error; no partial artifact is returned.
    pub fn compile(&self, spec: &PipelineSpec) -> Result<CompiledArtifact> {
        validate_pipeline(spec, &self.registry)?;

        let threads = self.options.effective_threads(spec.threads);
        tracing::info!(
            "Compiling pipeline '{}' v{} ({} steps, {} workers)",
            spec.name,
            spec.version,
            spec.steps.len(),
            threads
        );

        let mut session = Session::new(&self.registry);
        let mut scope = Scope::global(self.options.branch_refs);
        let mut main = Vec::with_capacity(spec.steps.len());

        for (idx, step) in spec.steps.iter().enumerate() {
            let location = StepLocation::top(idx);
            tracing::debug!("Compiling {location} ({})", step.kind());

            match step {
                Step::Split { branches, parallel } => {
                    scope.end_write_run();
                    session.split_ordinal += 1;
                    let ordinal = session.split_ordinal;

                    // Branch units are hoisted before their call site is planned.
                    let calls = branches
                        .iter()
                        .map(|b| branch::compile_branch(&mut session, b, ordinal, &location))
                        .collect::<Result<Vec<_>>>()?;

                    main.push(PlanNode::split(*parallel, scope.current(), calls));
                    scope.enter_split(branches.iter().map(|b| b.name.clone()).collect());
                }
                Step::Merge { params } => {
                    scope.end_write_run();
                    let inputs = scope.resolve_merge_inputs(params, &location)?;
                    session.merge_ordinal += 1;
                    let merged = format!("merged_{}", session.merge_ordinal);

                    let fragment = self.registry.emit(
                        &Descriptor::Merge {
                            params,
                            inputs: &inputs,
                        },
                        &location,
                    )?;
                    main.push(PlanNode::Inline(fragment.render(&merged)));
                    scope.rebind(merged);
                }
                linear => main.push(session.compile_linear_step(linear, &mut scope, &location)?),
            }
        }

        let artifact = assembler::assemble(&spec.name, threads, &session.units, &main)?;
        tracing::info!(
            "Compiled pipeline '{}': {} units",
            spec.name,
            artifact.unit_names.len()
        );
        Ok(artifact)
    }
}

/// State of one compilation: hoisted units and naming counters.
pub(crate) struct Session<'r> {
    registry: &'r EmitterRegistry,
    units: Vec<UnitDefinition>,
    split_ordinal: usize,
    write_ordinal: usize,
    merge_ordinal: usize,
}

impl<'r> Session<'r> {
    fn new(registry: &'r EmitterRegistry) -> Self {
        Self {
            registry,
            units: Vec::new(),
            split_ordinal: 0,
            write_ordinal: 0,
            merge_ordinal: 0,
        }
    }

    /// Hoist a unit to program-definition level.
    pub(crate) fn define(&mut self, unit: UnitDefinition) {
        tracing::debug!("Defined unit {}", unit.name);
        self.units.push(unit);
    }

    /// Compile a read, transform or write step against `scope`.
    pub(crate) fn compile_linear_step(
        &mut self,
        step: &Step,
        scope: &mut Scope,
        location: &StepLocation,
    ) -> Result<PlanNode> {
        match step {
            Step::Read { source } => {
                scope.end_write_run();
                let fragment = self.registry.emit(&Descriptor::Read(source), location)?;
                Ok(PlanNode::Inline(fragment.render(scope.current())))
            }
            Step::Transform(transform) => {
                scope.end_write_run();
                let fragment = self
                    .registry
                    .emit(&Descriptor::Transform(transform), location)?;
                Ok(PlanNode::Inline(fragment.render(scope.current())))
            }
            Step::Write {
                targets,
                concurrent,
            } => self.compile_write(targets, *concurrent, scope, location),
            Step::Split { .. } | Step::Merge { .. } => Err(PipelineError::invalid_step(
                location,
                format!("'{}' is only allowed at top level", step.kind()),
            )),
        }
    }

    fn compile_write(
        &mut self,
        targets: &[Endpoint],
        concurrent: bool,
        scope: &mut Scope,
        location: &StepLocation,
    ) -> Result<PlanNode> {
        let mut planned = Vec::with_capacity(targets.len());
        for target in targets {
            let source = scope.resolve_write_source(target, location)?;
            let fragment = self.registry.emit(&Descriptor::Write(target), location)?;
            planned.push((source, fragment));
        }

        match plan::write_mode(concurrent, planned.len()) {
            ExecutionMode::Sequential => Ok(PlanNode::Inline(
                planned
                    .iter()
                    .flat_map(|(source, fragment)| fragment.render(source))
                    .collect(),
            )),
            ExecutionMode::Parallel => {
                self.write_ordinal += 1;
                let mut calls = Vec::with_capacity(planned.len());
                for (idx, (source, fragment)) in planned.into_iter().enumerate() {
                    let unit = format!("write_{}_{}", self.write_ordinal, idx + 1);
                    // Each unit sees only its own dataset, through its parameter.
                    self.define(UnitDefinition {
                        name: unit.clone(),
                        param: WRITE_PARAM.to_owned(),
                        body: fragment.render(WRITE_PARAM),
                        references: Vec::new(),
                    });
                    calls.push(WriteCall { unit, source });
                }
                Ok(PlanNode::ConcurrentWrites { calls })
            }
        }
    }
}
