//! Compiler options and user settings.
//!
//! Settings come from an optional JSON file; missing files or missing keys
//! fall back to defaults. Precedence when compiling is: command-line flag,
//! then settings file, then the pipeline document, then built-in defaults.

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_PYTHON_TIMEOUT_SECS: u64 = 300;

/// How writes directly after a split pick their source when they name no branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchRefPolicy {
    /// Unannotated writes bind to branch results in declaration order.
    #[default]
    Positional,

    /// Every write directly after a split must carry a `branch` reference.
    Explicit,
}

/// Options that shape one compilation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Overrides the document's `threads` when set
    pub threads: Option<usize>,
    pub branch_refs: BranchRefPolicy,
}

impl CompileOptions {
    /// Worker pool size for a document declaring `declared` threads.
    pub fn effective_threads(&self, declared: usize) -> usize {
        self.threads.filter(|n| *n > 0).unwrap_or(declared)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Worker pool size override
    pub threads: Option<usize>,

    /// Require explicit branch references on writes after a split
    pub strict_branch_refs: bool,

    /// Python interpreter used by `run`
    pub python: String,

    /// Seconds before a `run` is aborted
    pub timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threads: None,
            strict_branch_refs: false,
            python: default_python().to_owned(),
            timeout_secs: DEFAULT_PYTHON_TIMEOUT_SECS,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or defaults when the file does not exist.
    ///
    /// Environment overrides (`PIPEWRIGHT_PYTHON`,
    /// `PIPEWRIGHT_PYTHON_TIMEOUT_SECS`) are applied on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings {}", path.display()))?;
                serde_json::from_str(&content).context("Failed to parse settings JSON")?
            }
            Some(path) => {
                tracing::debug!("Settings file {} not found, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    /// Default settings location in the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pipewright").join("settings.json"))
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            threads: self.threads,
            branch_refs: if self.strict_branch_refs {
                BranchRefPolicy::Explicit
            } else {
                BranchRefPolicy::Positional
            },
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    fn apply_env(&mut self) {
        if let Ok(python) = std::env::var("PIPEWRIGHT_PYTHON")
            && !python.is_empty()
        {
            self.python = python;
        }
        if let Some(secs) = std::env::var("PIPEWRIGHT_PYTHON_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
        {
            self.timeout_secs = secs;
        }
    }
}

fn default_python() -> &'static str {
    if cfg!(target_os = "windows") {
        "python"
    } else {
        "python3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_threads() {
        let options = CompileOptions::default();
        assert_eq!(options.effective_threads(3), 3);

        let options = CompileOptions {
            threads: Some(8),
            ..Default::default()
        };
        assert_eq!(options.effective_threads(3), 8);

        let options = CompileOptions {
            threads: Some(0),
            ..Default::default()
        };
        assert_eq!(options.effective_threads(2), 2);
    }

    #[test]
    fn test_partial_settings_use_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"strict_branch_refs": true}"#).unwrap();
        assert!(settings.strict_branch_refs);
        assert_eq!(settings.timeout_secs, DEFAULT_PYTHON_TIMEOUT_SECS);
        assert_eq!(
            settings.compile_options().branch_refs,
            BranchRefPolicy::Explicit
        );
    }

    #[test]
    fn test_missing_settings_file() {
        let path = std::env::temp_dir().join("pipewright_missing_settings_7f3a.json");
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.threads, None);
        assert!(!settings.strict_branch_refs);
    }

    #[test]
    fn test_policy_serde() {
        let policy: BranchRefPolicy = serde_json::from_str("\"explicit\"").unwrap();
        assert_eq!(policy, BranchRefPolicy::Explicit);
    }
}
