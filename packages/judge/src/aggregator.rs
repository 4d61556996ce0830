//! Verdict Aggregator - pure reduction of a submission's run verdicts into
//! one submission verdict.

use common::{TestCaseRun, Verdict};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("Submission has no test case runs")]
    Empty,

    #[error("{pending} test case runs are not terminal yet")]
    Unresolved { pending: usize },
}

/// Final verdict of a submission plus its summary fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub verdict: Verdict,
    pub time_used: Option<i64>,
    pub memory_used: Option<i64>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    /// Runs that contributed to the verdict.
    pub considered: usize,
}

/// Highest-precedence verdict among `verdicts`.
pub fn reduce(verdicts: impl IntoIterator<Item = Verdict>) -> Option<Verdict> {
    verdicts.into_iter().max()
}

/// Aggregate runs given in dispatch order.
///
/// A compile error on the first run short-circuits: the remaining runs are
/// never dispatched and are ignored here. Otherwise every run must be
/// terminal.
pub fn aggregate(runs: &[TestCaseRun]) -> Result<Aggregate, AggregateError> {
    let first = runs.first().ok_or(AggregateError::Empty)?;

    let considered = if first.verdict == Some(Verdict::CompileError) {
        &runs[..1]
    } else {
        let pending = runs.iter().filter(|run| !run.is_terminal()).count();
        if pending > 0 {
            return Err(AggregateError::Unresolved { pending });
        }
        runs
    };

    let verdict = reduce(considered.iter().filter_map(|run| run.verdict))
        .ok_or(AggregateError::Unresolved { pending: runs.len() })?;

    let representative = considered
        .iter()
        .find(|run| run.verdict.is_some_and(|v| !v.is_accepted()))
        .or_else(|| considered.last())
        .unwrap_or(first);

    Ok(Aggregate {
        verdict,
        time_used: considered.iter().filter_map(|run| run.time_used).max(),
        memory_used: considered.iter().filter_map(|run| run.memory_used).max(),
        stdout: representative.stdout.clone(),
        stderr: representative.stderr.clone(),
        compile_output: representative.compile_output.clone(),
        considered: considered.len(),
    })
}
