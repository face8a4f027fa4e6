//! Tracks which identifier names "the current dataset" while steps compile.
//!
//! At top level the current dataset is [`GLOBAL_DATASET`]. A split binds each
//! branch result to `result_<branch>`; later writes and merges address those
//! results by branch name. Inside a branch unit the current dataset is the
//! branch-local copy `df_<branch>`.

use super::spec::{Endpoint, Params};
use crate::config::BranchRefPolicy;
use crate::error::{PipelineError, Result, StepLocation};
use serde_json::Value;

/// Identifier of the top-level dataset in generated programs.
pub const GLOBAL_DATASET: &str = "df";

/// Branch-local dataset identifier.
pub fn branch_dataset(branch: &str) -> String {
    format!("{GLOBAL_DATASET}_{branch}")
}

/// Identifier bound to a branch's result after its split.
pub fn result_ident(branch: &str) -> String {
    format!("result_{branch}")
}

#[derive(Debug, Clone)]
struct SplitBinding {
    branches: Vec<String>,
    // Next branch offered to an unannotated write; `None` once the run of
    // writes directly after the split has ended.
    positional: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Scope {
    current: String,
    split: Option<SplitBinding>,
    policy: BranchRefPolicy,
}

impl Scope {
    /// Top-level scope.
    pub fn global(policy: BranchRefPolicy) -> Self {
        Self {
            current: GLOBAL_DATASET.to_owned(),
            split: None,
            policy,
        }
    }

    /// Scope of a compiled branch unit. Branch results are never visible here.
    pub fn branch(name: &str) -> Self {
        Self {
            current: branch_dataset(name),
            split: None,
            policy: BranchRefPolicy::Explicit,
        }
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    /// Make `ident` the current dataset for subsequent steps.
    pub fn rebind(&mut self, ident: impl Into<String>) {
        self.current = ident.into();
    }

    /// Bind the results of a split's branches, in declared order.
    pub fn enter_split(&mut self, branches: Vec<String>) {
        self.split = Some(SplitBinding {
            branches,
            positional: Some(0),
        });
    }

    /// Any step other than a write ends positional binding.
    pub fn end_write_run(&mut self) {
        if let Some(split) = &mut self.split {
            split.positional = None;
        }
    }

    /// Dataset identifier a write target reads from.
    pub fn resolve_write_source(
        &mut self,
        target: &Endpoint,
        location: &StepLocation,
    ) -> Result<String> {
        if let Some(name) = &target.branch {
            return self.branch_result(name, location);
        }

        let policy = self.policy;
        let Some(split) = &mut self.split else {
            return Ok(self.current.clone());
        };
        let Some(next) = split.positional else {
            return Ok(self.current.clone());
        };

        if policy == BranchRefPolicy::Explicit {
            return Err(PipelineError::invalid_step(
                location,
                "a write directly after a split must name its source with 'branch'",
            ));
        }

        match split.branches.get(next) {
            Some(name) => {
                split.positional = Some(next + 1);
                tracing::warn!(
                    "{location}: unannotated write bound positionally to branch '{name}'; \
                     prefer an explicit 'branch' reference"
                );
                Ok(result_ident(name))
            }
            None => Ok(self.current.clone()),
        }
    }

    /// Branch result identifiers a merge reunites.
    ///
    /// Without a `branches` parameter every branch of the most recent split is
    /// merged, in declared order.
    pub fn resolve_merge_inputs(
        &self,
        params: &Params,
        location: &StepLocation,
    ) -> Result<Vec<String>> {
        let Some(split) = &self.split else {
            return Err(PipelineError::invalid_step(
                location,
                "merge requires a preceding split",
            ));
        };

        let names: Vec<String> = match params.get("branches") {
            None => split.branches.clone(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_owned).ok_or_else(|| {
                        PipelineError::invalid_step(location, "'branches' must list branch names")
                    })
                })
                .collect::<Result<_>>()?,
            Some(_) => {
                return Err(PipelineError::invalid_step(
                    location,
                    "'branches' must list branch names",
                ));
            }
        };

        if names.is_empty() {
            return Err(PipelineError::invalid_step(
                location,
                "merge needs at least one branch",
            ));
        }

        names
            .iter()
            .map(|name| self.branch_result(name, location))
            .collect()
    }

    fn branch_result(&self, name: &str, location: &StepLocation) -> Result<String> {
        let declared = self
            .split
            .as_ref()
            .is_some_and(|split| split.branches.iter().any(|b| b == name));
        if declared {
            Ok(result_ident(name))
        } else {
            Err(PipelineError::UnknownBranch {
                name: name.to_owned(),
                location: location.clone(),
            })
        }
    }
}

/// Replace whole-token occurrences of identifier `from` with `to`.
///
/// A token is a maximal run of `[A-Za-z0-9_]`. Tokens inside string literals
/// and attribute names (`obj.df`) are left alone, so `df_total`, `mydf`,
/// `"df"` and `x.df` survive a rewrite of `df`.
pub fn rewrite_token(text: &str, from: &str, to: &str) -> String {
    if from == to {
        return text.to_owned();
    }

    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    let mut quote: Option<char> = None;
    let mut prev_significant: Option<char> = None;

    while let Some((start, c)) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some((_, escaped)) = chars.next() {
                    out.push(escaped);
                }
            } else if c == q {
                quote = None;
                prev_significant = Some(c);
            }
            continue;
        }

        if c == '"' || c == '\'' {
            quote = Some(c);
            out.push(c);
            continue;
        }

        if is_word_char(c) {
            let mut end = start + c.len_utf8();
            while let Some(&(idx, next)) = chars.peek() {
                if !is_word_char(next) {
                    break;
                }
                end = idx + next.len_utf8();
                chars.next();
            }
            let word = text.get(start..end).unwrap_or_default();
            if word == from && prev_significant != Some('.') {
                out.push_str(to);
            } else {
                out.push_str(word);
            }
            prev_significant = word.chars().last();
            continue;
        }

        out.push(c);
        if !c.is_whitespace() {
            prev_significant = Some(c);
        }
    }

    out
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
