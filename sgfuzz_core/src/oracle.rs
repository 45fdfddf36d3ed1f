use crate::executor::{Execution, ExecutionOutcome};
use crate::program::{Instruction, Program};
use std::collections::HashSet;
use std::time::Duration;

/// Everything needed to reproduce and triage a crash.
#[derive(Debug, Clone)]
pub struct CrashReport {
    /// Textual listing of the crashing program.
    pub program: String,
    pub signal: i32,
    pub stdout: String,
    pub stderr: String,
    pub exec_time: Duration,
    pub contributors: Vec<&'static str>,
    /// MD5 hex digest of `program`, used for de-duplication.
    pub program_hash: String,
    /// `false` if a crash with the same hash was reported before.
    pub is_unique: bool,
}

/// Turns crashed executions into `CrashReport`s and remembers which
/// crashing programs it has already seen.
#[derive(Debug, Default)]
pub struct CrashOracle {
    known_hashes: HashSet<String>,
}

impl CrashOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a report if `execution` crashed, `None` otherwise.
    pub fn examine<I: Instruction>(
        &mut self,
        program: &Program<I>,
        execution: &Execution,
    ) -> Option<CrashReport> {
        let ExecutionOutcome::Crashed(signal) = execution.outcome else {
            return None;
        };
        let lifted = program.lift();
        let program_hash = format!("{:x}", md5::compute(lifted.as_bytes()));
        let is_unique = self.known_hashes.insert(program_hash.clone());
        Some(CrashReport {
            program: lifted,
            signal,
            stdout: execution.stdout.clone(),
            stderr: execution.stderr.clone(),
            exec_time: execution.exec_time,
            contributors: program.contributors().to_vec(),
            program_hash,
            is_unique,
        })
    }

    pub fn unique_crashes(&self) -> usize {
        self.known_hashes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution(outcome: ExecutionOutcome) -> Execution {
        Execution {
            outcome,
            stdout: "out".to_string(),
            stderr: "boom".to_string(),
            exec_time: Duration::from_millis(4),
        }
    }

    #[test]
    fn crash_oracle_detects_crash_and_creates_valid_report() {
        let mut oracle = CrashOracle::new();
        let mut program: Program<u8> = vec![0xFF, 0xFE].into();
        program.add_contributor("SpliceMutator");

        let report = oracle
            .examine(&program, &execution(ExecutionOutcome::Crashed(11)))
            .expect("crash should be reported");
        assert_eq!(report.signal, 11);
        assert_eq!(report.program, program.lift());
        assert_eq!(report.stderr, "boom");
        assert_eq!(report.stdout, "out");
        assert_eq!(report.exec_time, Duration::from_millis(4));
        assert_eq!(report.contributors, vec!["SpliceMutator"]);
        assert_eq!(
            report.program_hash,
            format!("{:x}", md5::compute(program.lift().as_bytes()))
        );
        assert!(report.is_unique);
    }

    #[test]
    fn crash_oracle_deduplicates_by_program_hash() {
        let mut oracle = CrashOracle::new();
        let program: Program<u8> = vec![1, 2, 3].into();
        let crash = execution(ExecutionOutcome::Crashed(6));
        assert!(oracle.examine(&program, &crash).unwrap().is_unique);
        assert!(!oracle.examine(&program, &crash).unwrap().is_unique);

        let other: Program<u8> = vec![3, 2, 1].into();
        assert!(oracle.examine(&other, &crash).unwrap().is_unique);
        assert_eq!(oracle.unique_crashes(), 2);
    }

    #[test]
    fn crash_oracle_ignores_non_crash_outcomes() {
        let mut oracle = CrashOracle::new();
        let program: Program<u8> = vec![0x11].into();
        for outcome in [
            ExecutionOutcome::Succeeded,
            ExecutionOutcome::TimedOut,
            ExecutionOutcome::Failed("invalid".to_string()),
        ] {
            assert!(oracle.examine(&program, &execution(outcome)).is_none());
        }
        assert_eq!(oracle.unique_crashes(), 0);
    }
}
