use crate::coverage::{EdgeMap, SharedEdgeMap};
use crate::program::{Instruction, Program};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};

/// Signal reported for a harness panic; matches what an aborting panic would raise.
pub const PANIC_SIGNAL: i32 = 6;

/// How a single execution of a program ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The target died; carries the signal number.
    Crashed(i32),
    /// The target ran to completion and accepted the program.
    Succeeded,
    /// The target rejected the program; carries the reason it gave.
    Failed(String),
    /// The run exceeded the configured timeout.
    TimedOut,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded)
    }
}

/// Everything an executor reports back about one run.
#[derive(Debug, Clone)]
pub struct Execution {
    pub outcome: ExecutionOutcome,
    pub stdout: String,
    /// Panic message or rejection reason for in-process runs.
    pub stderr: String,
    /// Wall-clock time of the run.
    pub exec_time: Duration,
}

/// Runs programs against the target.
///
/// Executors record coverage as a side effect (the in-process one writes into
/// a shared [`EdgeMap`]); the engine reads it back through the coverage
/// evaluator rather than through the returned [`Execution`].
///
/// # Type Parameters
/// * `I`: The instruction type of the programs this executor can run.
pub trait Executor<I: Instruction> {
    /// Executes `program` once.
    ///
    /// # Arguments
    /// * `program`: The program to run. Only its code is handed to the target.
    ///
    /// # Returns
    /// An [`Execution`] with the outcome, captured output and wall-clock time.
    /// Target misbehaviour is reported through the outcome, never as a panic
    /// in the caller.
    fn execute(&mut self, program: &Program<I>) -> Execution;
}

/// Runs a harness closure in the fuzzer's own process.
///
/// The harness receives the program's code and the shared edge map to record
/// hits into. A panic is a crash. Otherwise a run longer than the timeout is
/// reported as timed out once it returns, whatever it returned, and a returned
/// `Err` is a failed execution.
pub struct InProcessExecutor<F> {
    harness_fn: F,
    edges: SharedEdgeMap,
    timeout: Duration,
}

impl<F> InProcessExecutor<F> {
    pub fn new(harness_fn: F, edges: SharedEdgeMap, timeout: Duration) -> Self {
        Self {
            harness_fn,
            edges,
            timeout,
        }
    }
}

impl<I, F> Executor<I> for InProcessExecutor<F>
where
    I: Instruction,
    F: Fn(&[I], &mut EdgeMap) -> Result<(), String>,
{
    fn execute(&mut self, program: &Program<I>) -> Execution {
        let start_time = Instant::now();
        let result = {
            let mut edges = self.edges.lock();
            catch_unwind(AssertUnwindSafe(|| {
                (self.harness_fn)(program.code(), &mut *edges)
            }))
        };
        let exec_time = start_time.elapsed();

        let (outcome, stderr) = match result {
            Ok(Ok(())) if exec_time > self.timeout => (ExecutionOutcome::TimedOut, String::new()),
            Ok(Err(reason)) if exec_time > self.timeout => (ExecutionOutcome::TimedOut, reason),
            Ok(Ok(())) => (ExecutionOutcome::Succeeded, String::new()),
            Ok(Err(reason)) => (ExecutionOutcome::Failed(reason.clone()), reason),
            Err(panic_payload) => {
                let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic type".to_string()
                };
                (ExecutionOutcome::Crashed(PANIC_SIGNAL), msg)
            }
        };

        Execution {
            outcome,
            stdout: String::new(),
            stderr,
            exec_time,
        }
    }
}
