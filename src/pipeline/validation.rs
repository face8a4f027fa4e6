//! Pipeline validation against an emitter registry.
//!
//! Runs before any code is planned and stops at the first violation, in
//! document order, so no partial artifact is ever produced. Every step is
//! emitted once here and the fragment discarded, so malformed parameters are
//! reported at their own step rather than after a later step's error.

use super::registry::{Descriptor, EmitterRegistry};
use super::scope::result_ident;
use super::spec::{Branch, Params, PipelineSpec, Step};
use crate::error::{PipelineError, Result, StepLocation};
use std::collections::BTreeSet;

/// Validate a pipeline spec against the step kinds `registry` can emit.
///
/// # Errors
///
/// The first of: `UnknownStep`, `UnknownEndpoint`, `InvalidStep` (malformed
/// parameters or branches, nested splits or merges, branch references inside
/// a branch, a merge without a split) or `DuplicateBranch`.
pub fn validate_pipeline(spec: &PipelineSpec, registry: &EmitterRegistry) -> Result<()> {
    let mut branch_results: Vec<String> = Vec::new();
    for (idx, step) in spec.steps.iter().enumerate() {
        let location = StepLocation::top(idx);
        validate_step(step, &location, registry)?;
        match step {
            Step::Split { branches, .. } => {
                branch_results = branches.iter().map(|b| result_ident(&b.name)).collect();
            }
            Step::Merge { params } => validate_merge(params, &branch_results, &location, registry)?,
            _ => {}
        }
    }
    tracing::debug!("Validated {} top-level steps", spec.steps.len());
    Ok(())
}

fn validate_step(step: &Step, location: &StepLocation, registry: &EmitterRegistry) -> Result<()> {
    let in_branch = location.branch_name().is_some();

    match step {
        Step::Read { source } => {
            registry.emit(&Descriptor::Read(source), location)?;
            if source.branch.is_some() {
                return Err(PipelineError::invalid_step(
                    location,
                    "a read source cannot reference a branch",
                ));
            }
        }

        Step::Write { targets, .. } => {
            for target in targets {
                registry.emit(&Descriptor::Write(target), location)?;
                if in_branch && target.branch.is_some() {
                    return Err(PipelineError::invalid_step(
                        location,
                        "writes inside a branch always write the branch dataset",
                    ));
                }
            }
        }

        Step::Transform(transform) => {
            registry.emit(&Descriptor::Transform(transform), location)?;
        }

        Step::Merge { .. } => {
            if in_branch {
                return Err(PipelineError::invalid_step(
                    location,
                    "merge is only allowed at top level",
                ));
            }
        }

        Step::Split { branches, .. } => {
            if in_branch {
                return Err(PipelineError::invalid_step(
                    location,
                    "splits cannot be nested inside a branch",
                ));
            }
            validate_branches(branches, location, registry)?;
        }
    }

    Ok(())
}

fn validate_branches(
    branches: &[Branch],
    location: &StepLocation,
    registry: &EmitterRegistry,
) -> Result<()> {
    let mut seen = BTreeSet::new();
    for branch in branches {
        if !is_identifier(&branch.name) {
            return Err(PipelineError::invalid_step(
                location,
                format!(
                    "branch name '{}' must start with a letter or '_' and contain only letters, digits and '_'",
                    branch.name
                ),
            ));
        }
        if !seen.insert(branch.name.as_str()) {
            return Err(PipelineError::DuplicateBranch {
                name: branch.name.clone(),
                location: location.clone(),
            });
        }
        for (idx, step) in branch.steps.iter().enumerate() {
            validate_step(step, &location.in_branch(&branch.name, idx), registry)?;
        }
    }
    Ok(())
}

/// Merge parameters are checked against every result of the preceding split;
/// which of them it reunites is resolved during compilation.
fn validate_merge(
    params: &Params,
    branch_results: &[String],
    location: &StepLocation,
    registry: &EmitterRegistry,
) -> Result<()> {
    if branch_results.is_empty() {
        return Err(PipelineError::invalid_step(
            location,
            "merge requires a preceding split",
        ));
    }
    registry.emit(
        &Descriptor::Merge {
            params,
            inputs: branch_results,
        },
        location,
    )?;
    Ok(())
}

/// Branch names become parts of generated identifiers.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EndpointRole;
    use serde_json::json;

    fn validate(doc: serde_json::Value) -> Result<()> {
        let spec = PipelineSpec::from_value(&doc)?;
        validate_pipeline(&spec, &EmitterRegistry::polars())
    }

    #[test]
    fn test_valid_pipeline() {
        validate(json!({"steps": [
            {"step": "read", "source": {"type": "csv", "path": "in.csv"}},
            {"step": "split", "branches": [
                {"name": "a", "steps": [{"step": "filter", "condition": "pl.col(\"x\") > 1"}]},
                {"name": "b", "steps": [{"step": "write", "target": {"type": "csv", "path": "b.csv"}}]}
            ]},
            {"step": "merge"},
            {"step": "write", "target": {"type": "mariadb", "host": "db", "database": "shop", "table": "t"}}
        ]}))
        .unwrap();
    }

    #[test]
    fn test_unknown_step_kind() {
        let err = validate(json!({"steps": [{"step": "unknown"}]})).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownStep { ref kind, .. } if kind == "unknown"));
    }

    #[test]
    fn test_unknown_source_kind() {
        let err = validate(json!({"steps": [
            {"step": "read", "source": {"type": "ftp", "path": "x"}}
        ]}))
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnknownEndpoint { ref kind, role: EndpointRole::Source, .. } if kind == "ftp"
        ));
    }

    #[test]
    fn test_unknown_step_in_branch_names_branch() {
        let err = validate(json!({"steps": [
            {"step": "split", "branches": [{"name": "agg", "steps": [{"step": "pivot"}]}]}
        ]}))
        .unwrap_err();
        let PipelineError::UnknownStep { kind, location } = err else {
            panic!("expected UnknownStep");
        };
        assert_eq!(kind, "pivot");
        assert_eq!(location.branch_name(), Some("agg"));
    }

    #[test]
    fn test_first_violation_wins() {
        let err = validate(json!({"steps": [
            {"step": "read", "source": {"type": "ftp"}},
            {"step": "unknown"}
        ]}))
        .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownEndpoint { .. }));
    }

    #[test]
    fn test_parameter_errors_reported_at_their_step() {
        let err = validate(json!({"steps": [
            {"step": "read", "source": {"type": "csv"}},
            {"step": "unknown"}
        ]}))
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid step at step 1: missing required 'path'");

        let err = validate(json!({"steps": [
            {"step": "read", "source": {"type": "csv", "path": "a.csv"}},
            {"step": "join", "right": {"type": "ftp", "path": "b"}, "on": "id"},
            {"step": "unknown"}
        ]}))
        .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownEndpoint { ref kind, .. } if kind == "ftp"));
    }

    #[test]
    fn test_merge_parameters_checked() {
        let err = validate(json!({"steps": [
            {"step": "read", "source": {"type": "csv", "path": "a.csv"}},
            {"step": "split", "branches": [{"name": "a", "steps": []}]},
            {"step": "merge", "how": "zip"},
            {"step": "unknown"}
        ]}))
        .unwrap_err();
        assert!(err.to_string().contains("unsupported merge mode 'zip'"));

        let err = validate(json!({"steps": [
            {"step": "read", "source": {"type": "csv", "path": "a.csv"}},
            {"step": "merge"}
        ]}))
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidStep { .. }));
    }

    #[test]
    fn test_duplicate_branch() {
        let err = validate(json!({"steps": [
            {"step": "split", "branches": [
                {"name": "a", "steps": []},
                {"name": "a", "steps": []}
            ]}
        ]}))
        .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateBranch { ref name, .. } if name == "a"));
    }

    #[test]
    fn test_branch_name_must_be_identifier() {
        let err = validate(json!({"steps": [
            {"step": "split", "branches": [{"name": "my branch", "steps": []}]}
        ]}))
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidStep { .. }));
    }

    #[test]
    fn test_nested_split_and_merge_rejected() {
        let nested_split = validate(json!({"steps": [
            {"step": "split", "branches": [{"name": "a", "steps": [
                {"step": "split", "branches": [{"name": "b", "steps": []}]}
            ]}]}
        ]}));
        assert!(matches!(nested_split, Err(PipelineError::InvalidStep { .. })));

        let nested_merge = validate(json!({"steps": [
            {"step": "split", "branches": [{"name": "a", "steps": [{"step": "merge"}]}]}
        ]}));
        assert!(matches!(nested_merge, Err(PipelineError::InvalidStep { .. })));
    }

    #[test]
    fn test_branch_reference_inside_branch_rejected() {
        let err = validate(json!({"steps": [
            {"step": "split", "branches": [{"name": "a", "steps": [
                {"step": "write", "target": {"type": "csv", "path": "x.csv", "branch": "a"}}
            ]}]}
        ]}))
        .unwrap_err();
        assert!(err.to_string().contains("branch dataset"));
    }

    #[test]
    fn test_identifier_rule() {
        assert!(is_identifier("agg"));
        assert!(is_identifier("_tx2"));
        assert!(!is_identifier("2tx"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a-b"));
    }
}
