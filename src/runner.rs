//! Runs generated programs with an external Python interpreter.
//!
//! The program is piped to the interpreter on stdin, so nothing is written to
//! disk. A run that exceeds the configured timeout is killed.

use crate::config::Settings;
use crate::error::{PipelineError, Result, ResultExt as _};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;
use tokio::time::timeout;

const PROBE_TIMEOUT_SECS: u64 = 30;

/// Captured output of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub struct PythonRunner {
    python: String,
    timeout: Duration,
}

impl PythonRunner {
    pub fn new(python: impl Into<String>, timeout: Duration) -> Self {
        Self {
            python: python.into(),
            timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.python.clone(), settings.timeout())
    }

    pub fn python(&self) -> &str {
        &self.python
    }

    /// Version of polars importable by the interpreter.
    ///
    /// # Errors
    ///
    /// `Execution` when the interpreter cannot be started or polars is missing.
    pub async fn probe(&self) -> Result<String> {
        let output = self
            .execute(
                "import polars\nprint(polars.__version__)\n",
                None,
                Duration::from_secs(PROBE_TIMEOUT_SECS),
                "probe",
            )
            .await?;
        Ok(output.stdout.trim().to_owned())
    }

    /// Run `script`, with `workdir` as the working directory when given.
    ///
    /// # Errors
    ///
    /// `Execution` with the interpreter's own error output when the program
    /// fails, or when it runs past the timeout.
    pub async fn run(&self, script: &str, workdir: Option<&Path>) -> Result<RunOutput> {
        self.execute(script, workdir, self.timeout, "run").await
    }

    async fn execute(
        &self,
        script: &str,
        workdir: Option<&Path>,
        limit: Duration,
        log_tag: &str,
    ) -> Result<RunOutput> {
        let mut cmd = Command::new(&self.python);
        cmd.arg("-");
        cmd.env("PYTHONIOENCODING", "utf-8");
        cmd.env("PYTHONUNBUFFERED", "1");
        if let Some(dir) = workdir {
            cmd.current_dir(dir);
        }

        tracing::debug!("[{log_tag}] Spawning {}", self.python);

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PipelineError::Execution(format!("Failed to spawn '{}': {e}", self.python))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PipelineError::Execution("Failed to open stdin".to_owned()))?;
        stdin
            .write_all(script.as_bytes())
            .await
            .context("Failed to write program to stdin")?;
        drop(stdin);

        let out = match timeout(limit, child.wait_with_output()).await {
            Ok(result) => result.context("Failed to wait for python process")?,
            Err(_) => {
                return Err(PipelineError::Execution(format!(
                    "Python execution timed out after {} seconds",
                    limit.as_secs()
                )));
            }
        };

        tracing::debug!(
            "[{log_tag}] Python process completed with exit code: {:?}",
            out.status.code()
        );

        let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&out.stderr).into_owned();

        if out.status.success() {
            Ok(RunOutput { stdout, stderr })
        } else {
            Err(PipelineError::Execution(failure_message(&stderr, &stdout)))
        }
    }
}

/// The interpreter's report of a failed run, last line first.
///
/// A Python traceback ends with the exception line, which is the part worth
/// surfacing; the full traceback follows it.
fn failure_message(stderr: &str, stdout: &str) -> String {
    let report = if stderr.trim().is_empty() {
        stdout.trim()
    } else {
        stderr.trim()
    };
    match report.lines().rev().find(|line| !line.trim().is_empty()) {
        Some(last) if last != report => format!("{last}\n\n{report}"),
        Some(last) => last.to_owned(),
        None => "Python exited with an error and no output".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_leads_with_exception() {
        let stderr = "Traceback (most recent call last):\n  File \"<stdin>\", line 3\nValueError: boom\n";
        let message = failure_message(stderr, "");
        assert!(message.starts_with("ValueError: boom\n\nTraceback"));
    }

    #[test]
    fn test_failure_message_fallbacks() {
        assert_eq!(failure_message("", "only stdout"), "only stdout");
        assert_eq!(
            failure_message("  ", ""),
            "Python exited with an error and no output"
        );
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let runner = PythonRunner::new("pipewright-no-such-python", Duration::from_secs(5));
        let err = runner.run("print(1)", None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Execution(_)));
    }
}
