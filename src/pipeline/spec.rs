//! Pipeline document data structures.
//!
//! A pipeline document is JSON with a required `steps` array. Parsing here is
//! purely structural: it checks the shape each step needs (a `source` for
//! reads, `target` for writes, `branches` for splits) and keeps every other
//! parameter opaque. Whether a step or endpoint kind is actually supported is
//! decided later against an emitter registry, see [`super::validation`].

use crate::error::{PipelineError, Result, ResultExt as _, StepLocation};
use serde_json::{Map, Value};
use std::path::Path;

/// Current pipeline document version
pub const SPEC_VERSION: &str = "0.1";

/// Worker pool size when the document does not set `threads`
pub const DEFAULT_THREADS: usize = 1;

const DEFAULT_NAME: &str = "pipeline";

/// Kind-specific step parameters, passed through to emitters untouched.
pub type Params = Map<String, Value>;

/// A parsed pipeline document
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSpec {
    /// Document version
    pub version: String,

    /// Human-readable pipeline name
    pub name: String,

    /// Worker pool size for parallel splits and concurrent writes
    pub threads: usize,

    /// Ordered sequence of steps; never reordered
    pub steps: Vec<Step>,
}

/// One declared unit of pipeline work.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Read {
        source: Endpoint,
    },
    Write {
        targets: Vec<Endpoint>,
        concurrent: bool,
    },
    /// Single-dispatch steps such as `filter`, `join` and `group`.
    Transform(Transform),
    Merge {
        params: Params,
    },
    Split {
        branches: Vec<Branch>,
        parallel: bool,
    },
}

impl Step {
    /// The declared `step` kind.
    pub fn kind(&self) -> &str {
        match self {
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::Transform(t) => &t.kind,
            Self::Merge { .. } => "merge",
            Self::Split { .. } => "split",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    pub kind: String,
    pub params: Params,
}

/// A read source or write target.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    /// Declared `type` (e.g. `csv`, `database`)
    pub kind: String,

    /// Connection parameters, `type` and `branch` removed
    pub params: Params,

    /// Branch result a write target sources from
    pub branch: Option<String>,
}

/// A named sub-pipeline of a split.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub name: String,
    pub steps: Vec<Step>,
}

impl PipelineSpec {
    /// Load a pipeline document from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline document {}", path.display()))?;
        Self::from_json(&content)
    }

    /// Parse a pipeline document from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(json)?;
        Self::from_value(&doc)
    }

    /// Parse an already-decoded pipeline document
    pub fn from_value(doc: &Value) -> Result<Self> {
        let Some(root) = doc.as_object() else {
            return Err(PipelineError::configuration(
                "<document>",
                "the pipeline document must be a JSON object",
            ));
        };

        let Some(raw_steps) = root.get("steps") else {
            return Err(PipelineError::configuration(
                "steps",
                "the configuration must contain a 'steps' key defining the processing steps",
            ));
        };
        let Some(raw_steps) = raw_steps.as_array() else {
            return Err(PipelineError::configuration(
                "steps",
                "'steps' must be a list of steps",
            ));
        };
        if raw_steps.is_empty() {
            return Err(PipelineError::configuration(
                "steps",
                "'steps' must contain at least one step",
            ));
        }

        let name = optional_string(root, "name")?.unwrap_or_else(|| DEFAULT_NAME.to_owned());
        let version =
            optional_string(root, "version")?.unwrap_or_else(|| SPEC_VERSION.to_owned());
        if version != SPEC_VERSION {
            return Err(PipelineError::configuration(
                "version",
                format!("unsupported document version '{version}' (expected '{SPEC_VERSION}')"),
            ));
        }
        let threads = match root.get("threads") {
            None => DEFAULT_THREADS,
            Some(value) => value
                .as_u64()
                .filter(|n| *n > 0)
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| {
                    PipelineError::configuration("threads", "must be a positive integer")
                })?,
        };

        let steps = raw_steps
            .iter()
            .enumerate()
            .map(|(idx, raw)| parse_step(raw, &StepLocation::top(idx)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            version,
            name,
            threads,
            steps,
        })
    }
}

fn optional_string(root: &Params, key: &str) -> Result<Option<String>> {
    match root.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(PipelineError::configuration(key, "must be a string")),
    }
}

fn parse_step(raw: &Value, location: &StepLocation) -> Result<Step> {
    let Some(obj) = raw.as_object() else {
        return Err(PipelineError::invalid_step(location, "a step must be an object"));
    };
    let Some(kind) = obj.get("step") else {
        return Err(PipelineError::invalid_step(location, "missing required key 'step'"));
    };
    let Some(kind) = kind.as_str() else {
        return Err(PipelineError::invalid_step(location, "'step' must be a string"));
    };

    match kind {
        "read" => {
            let source = obj
                .get("source")
                .ok_or_else(|| PipelineError::invalid_step(location, "read step needs a 'source'"))?;
            Ok(Step::Read {
                source: parse_endpoint(source, "source", location)?,
            })
        }
        "write" => {
            let target = obj
                .get("target")
                .ok_or_else(|| PipelineError::invalid_step(location, "write step needs a 'target'"))?;
            let targets = match target {
                Value::Array(items) if items.is_empty() => {
                    return Err(PipelineError::invalid_step(
                        location,
                        "'target' list must not be empty",
                    ));
                }
                Value::Array(items) => items
                    .iter()
                    .map(|item| parse_endpoint(item, "target", location))
                    .collect::<Result<Vec<_>>>()?,
                single => vec![parse_endpoint(single, "target", location)?],
            };
            Ok(Step::Write {
                targets,
                concurrent: optional_bool(obj, "concurrent_write", location)?,
            })
        }
        "split" => {
            let Some(raw_branches) = obj.get("branches").and_then(Value::as_array) else {
                return Err(PipelineError::invalid_step(
                    location,
                    "split step needs a 'branches' list",
                ));
            };
            if raw_branches.is_empty() {
                return Err(PipelineError::invalid_step(
                    location,
                    "split step needs at least one branch",
                ));
            }
            let branches = raw_branches
                .iter()
                .map(|raw| parse_branch(raw, location))
                .collect::<Result<Vec<_>>>()?;
            Ok(Step::Split {
                branches,
                parallel: optional_bool(obj, "parallel", location)?,
            })
        }
        "merge" => Ok(Step::Merge {
            params: without_keys(obj, &["step"]),
        }),
        other => Ok(Step::Transform(Transform {
            kind: other.to_owned(),
            params: without_keys(obj, &["step"]),
        })),
    }
}

fn parse_branch(raw: &Value, location: &StepLocation) -> Result<Branch> {
    let Some(obj) = raw.as_object() else {
        return Err(PipelineError::invalid_step(location, "a branch must be an object"));
    };
    let Some(name) = obj.get("name").and_then(Value::as_str) else {
        return Err(PipelineError::invalid_step(location, "every branch needs a 'name'"));
    };
    let Some(raw_steps) = obj.get("steps").and_then(Value::as_array) else {
        return Err(PipelineError::invalid_step(
            location,
            format!("branch '{name}' needs a 'steps' list"),
        ));
    };

    let steps = raw_steps
        .iter()
        .enumerate()
        .map(|(idx, raw)| parse_step(raw, &location.in_branch(name, idx)))
        .collect::<Result<Vec<_>>>()?;

    Ok(Branch {
        name: name.to_owned(),
        steps,
    })
}

fn parse_endpoint(raw: &Value, key: &str, location: &StepLocation) -> Result<Endpoint> {
    let Some(obj) = raw.as_object() else {
        return Err(PipelineError::invalid_step(
            location,
            format!("'{key}' must be an object"),
        ));
    };
    let Some(kind) = obj.get("type").and_then(Value::as_str) else {
        return Err(PipelineError::invalid_step(
            location,
            format!("'{key}' needs a 'type'"),
        ));
    };
    let branch = match obj.get("branch") {
        None => None,
        Some(Value::String(name)) => Some(name.clone()),
        Some(_) => {
            return Err(PipelineError::invalid_step(
                location,
                "'branch' must be a branch name",
            ));
        }
    };

    Ok(Endpoint {
        kind: kind.to_owned(),
        params: without_keys(obj, &["type", "branch"]),
        branch,
    })
}

fn optional_bool(obj: &Params, key: &str, location: &StepLocation) -> Result<bool> {
    match obj.get(key) {
        None => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(PipelineError::invalid_step(
            location,
            format!("'{key}' must be true or false"),
        )),
    }
}

fn without_keys(obj: &Params, keys: &[&str]) -> Params {
    obj.iter()
        .filter(|(k, _)| !keys.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
