//! Execution plan of the generated program and its orchestration code.
//!
//! The compiler stays single-threaded; concurrency exists only in the program
//! it generates. Each compiled step becomes a [`PlanNode`]: inline statements,
//! a split that invokes branch units sequentially or through the worker pool,
//! or a multi-target write fanned out to the pool. Results are always collected
//! in declared order, whatever order the pool finishes them in.

/// Name of the generated program's worker pool size constant.
pub const POOL_SIZE: &str = "MAX_WORKERS";

const INDENT: &str = "    ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

/// A branch unit invocation bound to its result identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchCall {
    pub branch: String,
    pub unit: String,
    pub result: String,
}

/// A write unit submitted with the dataset it writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCall {
    pub unit: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanNode {
    /// Statements executed in place, in order
    Inline(Vec<String>),

    /// Branch units invoked on `input`
    Split {
        mode: ExecutionMode,
        input: String,
        calls: Vec<BranchCall>,
    },

    /// Write units submitted to the pool; every one is awaited
    ConcurrentWrites { calls: Vec<WriteCall> },
}

/// Execution mode of a split.
pub fn split_mode(parallel: bool) -> ExecutionMode {
    if parallel {
        ExecutionMode::Parallel
    } else {
        ExecutionMode::Sequential
    }
}

/// Execution mode of a write step with `targets` endpoints.
///
/// Fan-out only pays off with more than one target.
pub fn write_mode(concurrent: bool, targets: usize) -> ExecutionMode {
    if concurrent && targets > 1 {
        ExecutionMode::Parallel
    } else {
        if concurrent {
            tracing::debug!("concurrent_write on a single target runs inline");
        }
        ExecutionMode::Sequential
    }
}

impl PlanNode {
    pub fn split(parallel: bool, input: impl Into<String>, calls: Vec<BranchCall>) -> Self {
        Self::Split {
            mode: split_mode(parallel),
            input: input.into(),
            calls,
        }
    }

    /// Units this node invokes, in invocation order.
    pub fn referenced_units(&self) -> Vec<&str> {
        match self {
            Self::Inline(_) => Vec::new(),
            Self::Split { calls, .. } => calls.iter().map(|c| c.unit.as_str()).collect(),
            Self::ConcurrentWrites { calls } => calls.iter().map(|c| c.unit.as_str()).collect(),
        }
    }

    /// Generated code for this node, unindented.
    pub fn render(&self) -> Vec<String> {
        match self {
            Self::Inline(lines) => lines.clone(),
            Self::Split {
                mode: ExecutionMode::Sequential,
                input,
                calls,
            } => calls
                .iter()
                .map(|c| format!("{} = {}({input})", c.result, c.unit))
                .collect(),
            Self::Split {
                mode: ExecutionMode::Parallel,
                input,
                calls,
            } => {
                let mut lines = vec![pool_header()];
                for call in calls {
                    lines.push(format!(
                        "{INDENT}{} = pool.submit({}, {input})",
                        future_ident(&call.branch),
                        call.unit
                    ));
                }
                // Collected in declared order, not completion order.
                for call in calls {
                    lines.push(format!(
                        "{INDENT}{} = {}.result()",
                        call.result,
                        future_ident(&call.branch)
                    ));
                }
                lines
            }
            Self::ConcurrentWrites { calls } => {
                let mut lines = vec![pool_header(), format!("{INDENT}pending = [")];
                for call in calls {
                    lines.push(format!(
                        "{INDENT}{INDENT}pool.submit({}, {}),",
                        call.unit, call.source
                    ));
                }
                lines.push(format!("{INDENT}]"));
                lines.push(format!("{INDENT}for future in pending:"));
                lines.push(format!("{INDENT}{INDENT}future.result()"));
                lines
            }
        }
    }
}

fn pool_header() -> String {
    format!("with ThreadPoolExecutor(max_workers={POOL_SIZE}) as pool:")
}

fn future_ident(branch: &str) -> String {
    format!("future_{branch}")
}

/// Indent every non-empty line by `level` steps.
pub fn indent(lines: &[String], level: usize) -> Vec<String> {
    let prefix = INDENT.repeat(level);
    lines
        .iter()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{prefix}{line}")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calls() -> Vec<BranchCall> {
        ["agg", "tx"]
            .iter()
            .map(|name| BranchCall {
                branch: (*name).to_owned(),
                unit: format!("branch_1_{name}"),
                result: format!("result_{name}"),
            })
            .collect()
    }

    #[test]
    fn test_modes() {
        assert_eq!(split_mode(false), ExecutionMode::Sequential);
        assert_eq!(split_mode(true), ExecutionMode::Parallel);
        assert_eq!(write_mode(true, 2), ExecutionMode::Parallel);
        assert_eq!(write_mode(true, 1), ExecutionMode::Sequential);
        assert_eq!(write_mode(false, 3), ExecutionMode::Sequential);
    }

    #[test]
    fn test_sequential_split_blocks_per_branch() {
        let node = PlanNode::split(false, "df", calls());
        assert_eq!(
            node.render(),
            vec!["result_agg = branch_1_agg(df)", "result_tx = branch_1_tx(df)"]
        );
    }

    #[test]
    fn test_parallel_split_submits_then_collects_in_order() {
        let node = PlanNode::split(true, "df", calls());
        assert_eq!(
            node.render(),
            vec![
                "with ThreadPoolExecutor(max_workers=MAX_WORKERS) as pool:",
                "    future_agg = pool.submit(branch_1_agg, df)",
                "    future_tx = pool.submit(branch_1_tx, df)",
                "    result_agg = future_agg.result()",
                "    result_tx = future_tx.result()",
            ]
        );
        assert_eq!(node.referenced_units(), vec!["branch_1_agg", "branch_1_tx"]);
    }

    #[test]
    fn test_concurrent_writes_await_every_unit() {
        let node = PlanNode::ConcurrentWrites {
            calls: vec![
                WriteCall {
                    unit: "write_1_1".to_owned(),
                    source: "result_agg".to_owned(),
                },
                WriteCall {
                    unit: "write_1_2".to_owned(),
                    source: "result_tx".to_owned(),
                },
            ],
        };
        assert_eq!(
            node.render(),
            vec![
                "with ThreadPoolExecutor(max_workers=MAX_WORKERS) as pool:",
                "    pending = [",
                "        pool.submit(write_1_1, result_agg),",
                "        pool.submit(write_1_2, result_tx),",
                "    ]",
                "    for future in pending:",
                "        future.result()",
            ]
        );
    }

    #[test]
    fn test_indent_skips_blank_lines() {
        let lines = vec!["a".to_owned(), String::new(), "b".to_owned()];
        assert_eq!(indent(&lines, 1), vec!["    a", "", "    b"]);
    }
}
