use crate::config::{FuzzerSettings, SgFuzzConfig};
use crate::corpus::{Corpus, CorpusError};
use crate::coverage::edge_diff;
use crate::executor::{ExecutionOutcome, Executor};
use crate::feedback::{CoverageAspects, CoverageEvaluator};
use crate::mutator::{MutatorPool, MutatorStats};
use crate::oracle::{CrashOracle, CrashReport};
use crate::program::{Instruction, Program};
use crate::scheduler::GroupScheduler;
use log::{debug, info, warn};
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No parent available: there are no seed groups and the corpus is empty")]
    NoParentAvailable,

    #[error(transparent)]
    Corpus(#[from] CorpusError),
}

/// Running totals over the lifetime of an engine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub rounds: u64,
    pub executions: u64,
    pub crashes: u64,
    pub unique_crashes: u64,
    pub interesting: u64,
    /// Executions that succeeded.
    pub valid: u64,
    /// Executions that failed.
    pub invalid: u64,
    pub timed_out: u64,
    /// Mutation steps skipped because every attempt failed.
    pub abandoned_steps: u64,
    pub nondeterministic: u64,
}

/// What a single call to [`MutationEngine::fuzz_one`] produced.
#[derive(Debug, Default)]
pub struct RoundReport {
    pub executions: usize,
    pub interesting: usize,
    pub crashes: Vec<CrashReport>,
}

/// Drives fuzzing rounds: pick a parent, derive a chain of candidates from
/// it, execute each one and feed interesting ones back into the seed groups.
pub struct MutationEngine<I: Instruction> {
    settings: FuzzerSettings,
    executor: Box<dyn Executor<I>>,
    evaluator: Box<dyn CoverageEvaluator>,
    mutators: MutatorPool<I>,
    corpus: Box<dyn Corpus<I>>,
    scheduler: GroupScheduler<I>,
    oracle: CrashOracle,
    rng: ChaCha8Rng,
    prefix: Vec<I>,
    stats: Statistics,
}

impl<I: Instruction> MutationEngine<I> {
    pub fn new(
        config: &SgFuzzConfig,
        executor: Box<dyn Executor<I>>,
        evaluator: Box<dyn CoverageEvaluator>,
        mutators: MutatorPool<I>,
        corpus: Box<dyn Corpus<I>>,
    ) -> Self {
        Self {
            settings: config.fuzzer.clone(),
            executor,
            evaluator,
            mutators,
            corpus,
            scheduler: GroupScheduler::new(config.scheduler.clone(), config.seed_groups),
            oracle: CrashOracle::new(),
            rng: ChaCha8Rng::seed_from_u64(config.fuzzer.seed),
            prefix: Vec::new(),
            stats: Statistics::default(),
        }
    }

    /// Instructions prepended to every parent before it is mutated.
    pub fn with_prefix(mut self, prefix: Vec<I>) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    pub fn scheduler(&self) -> &GroupScheduler<I> {
        &self.scheduler
    }

    pub fn corpus(&self) -> &dyn Corpus<I> {
        self.corpus.as_ref()
    }

    pub fn mutator_stats(&self) -> Vec<(&'static str, MutatorStats)> {
        self.mutators.stats()
    }

    pub fn evaluator_name(&self) -> &'static str {
        self.evaluator.name()
    }

    /// Runs one round.
    ///
    /// Only a successful candidate becomes the parent for the next mutation
    /// step; crashes, failures and timeouts leave the current parent in place.
    pub fn fuzz_one(&mut self) -> Result<RoundReport, EngineError> {
        let selected = self.next_parent()?;
        let mut parent = Arc::new(self.prepare_for_mutating(&selected));
        let mut round = RoundReport::default();
        self.stats.rounds += 1;

        for step in 0..self.settings.consecutive_mutations {
            let Some(candidate) = self.mutate_with_retries(&parent) else {
                self.stats.abandoned_steps += 1;
                warn!(
                    "Abandoning mutation step {} after {} failed attempts",
                    step, self.settings.max_mutation_attempts
                );
                continue;
            };
            if let Some(next) = self.execute_and_classify(candidate, &mut round) {
                parent = next;
            }
        }
        Ok(round)
    }

    fn next_parent(&mut self) -> Result<Arc<Program<I>>, EngineError> {
        if let Some(parent) = self.scheduler.next_parent(&mut self.rng) {
            return Ok(parent);
        }
        match self.corpus.random_select(&mut self.rng) {
            Ok((_, program)) => Ok(Arc::clone(program)),
            Err(CorpusError::CorpusIsEmpty) => Err(EngineError::NoParentAvailable),
            Err(e) => Err(e.into()),
        }
    }

    /// Rebuilds `parent` into a fresh, unadmitted program, prepending the
    /// configured prefix unless the parent already starts with it.
    fn prepare_for_mutating(&self, parent: &Program<I>) -> Program<I> {
        let has_prefix = parent.size() >= self.prefix.len()
            && parent
                .code()
                .iter()
                .zip(&self.prefix)
                .all(|(have, want)| have.opcode() == want.opcode());
        let mut code = Vec::with_capacity(self.prefix.len() + parent.size());
        if !has_prefix {
            code.extend_from_slice(&self.prefix);
        }
        code.extend_from_slice(parent.code());
        let mut prepared = Program::new(code);
        prepared.add_contributors(parent.contributors());
        prepared
    }

    fn mutate_with_retries(&mut self, parent: &Program<I>) -> Option<Program<I>> {
        for _ in 0..self.settings.max_mutation_attempts {
            match self
                .mutators
                .mutate(parent, &mut self.rng, Some(self.corpus.as_ref()))
            {
                Ok(child) if !child.is_empty() => return Some(child),
                Ok(_) => debug!("Discarding empty mutation result"),
                Err(_) => {}
            }
        }
        None
    }

    /// Executes a candidate and files it according to the outcome.
    ///
    /// Returns the candidate, shared, if it executed successfully.
    fn execute_and_classify(
        &mut self,
        mut candidate: Program<I>,
        round: &mut RoundReport,
    ) -> Option<Arc<Program<I>>> {
        let before = self.evaluator.edge_hit_counts();
        let execution = self.executor.execute(&candidate);
        let triggered = edge_diff(&before, &self.evaluator.edge_hit_counts());
        self.stats.executions += 1;
        round.executions += 1;
        candidate.set_exec_time(execution.exec_time);
        candidate.set_triggered_edges(triggered);
        let candidate = Arc::new(candidate);

        let next = match &execution.outcome {
            ExecutionOutcome::Crashed(signal) => {
                self.stats.crashes += 1;
                if let Some(report) = self.oracle.examine(candidate.as_ref(), &execution) {
                    if report.is_unique {
                        self.stats.unique_crashes += 1;
                        info!(
                            "Found crash (signal {}, hash {}, via {:?}):\n{}\n{}",
                            signal,
                            report.program_hash,
                            report.contributors,
                            report.program,
                            report.stderr
                        );
                    } else {
                        debug!("Duplicate crash {}", report.program_hash);
                    }
                    round.crashes.push(report);
                }
                None
            }
            ExecutionOutcome::Succeeded => {
                self.stats.valid += 1;
                if let Some(aspects) = self
                    .evaluator
                    .evaluate(&execution, candidate.triggered_edges())
                {
                    self.process_maybe_interesting(Arc::clone(&candidate), aspects);
                    round.interesting += 1;
                }
                Some(Arc::clone(&candidate))
            }
            ExecutionOutcome::Failed(reason) => {
                self.stats.invalid += 1;
                debug!("Candidate failed: {}", reason);
                None
            }
            ExecutionOutcome::TimedOut => {
                self.stats.timed_out += 1;
                None
            }
        };

        if self.settings.enable_diagnostics {
            self.check_determinism(&candidate);
        }
        next
    }

    /// Files an interesting program in the corpus and the seed groups.
    ///
    /// A corpus that refuses the program is logged and otherwise ignored so
    /// the rest of the round, and the crashes it already found, survive.
    fn process_maybe_interesting(&mut self, program: Arc<Program<I>>, aspects: CoverageAspects) {
        self.stats.interesting += 1;
        if let Err(e) = self.corpus.add(Arc::clone(&program)) {
            warn!("Could not add interesting program to the corpus: {}", e);
        }
        let size = program.size();
        let edges = program.triggered_edges().len();
        match self.scheduler.admit(program, aspects.clone(), &mut self.rng) {
            Some(group) => info!(
                "New interesting program ({}, size {}, {} triggered edges) -> seed group #{} of {}",
                aspects,
                size,
                edges,
                group,
                self.scheduler.len()
            ),
            None => debug!("Interesting program was already part of a seed group"),
        }
    }

    /// Executes the program twice more and warns if one rerun succeeds while
    /// the other fails. The reruns are not counted as executions.
    fn check_determinism(&mut self, program: &Program<I>) {
        let first = self.executor.execute(program);
        let second = self.executor.execute(program);
        let diverged = matches!(
            (&first.outcome, &second.outcome),
            (ExecutionOutcome::Succeeded, ExecutionOutcome::Failed(_))
                | (ExecutionOutcome::Failed(_), ExecutionOutcome::Succeeded)
        );
        if diverged {
            self.stats.nondeterministic += 1;
            warn!(
                "Non-deterministic execution: {:?} then {:?}\nProgram:\n{}\nFirst stdout: {}\nFirst stderr: {}\nSecond stdout: {}\nSecond stderr: {}",
                first.outcome,
                second.outcome,
                program.lift(),
                first.stdout,
                first.stderr,
                second.stdout,
                second.stderr
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::InMemoryCorpus;
    use crate::coverage::{EdgeMap, shared_edge_map};
    use crate::executor::InProcessExecutor;
    use crate::feedback::EdgeCoverageEvaluator;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn byte_harness(data: &[u8], edges: &mut EdgeMap) -> Result<(), String> {
        for &byte in data {
            edges.hit(byte as u32);
        }
        if data.windows(3).any(|window| window == b"BAD") {
            panic!("bad sequence");
        }
        if data.first() == Some(&0) {
            return Err("leading zero".to_string());
        }
        Ok(())
    }

    fn engine_with<F>(config: &SgFuzzConfig, harness: F, seeds: &[&[u8]]) -> MutationEngine<u8>
    where
        F: Fn(&[u8], &mut EdgeMap) -> Result<(), String> + 'static,
    {
        let edges = shared_edge_map();
        let executor = InProcessExecutor::new(harness, edges.clone(), Duration::from_secs(5));
        let mut corpus: InMemoryCorpus<u8> = InMemoryCorpus::new();
        for seed in seeds {
            corpus.add(Arc::new(seed.to_vec().into())).unwrap();
        }
        MutationEngine::new(
            config,
            Box::new(executor),
            Box::new(EdgeCoverageEvaluator::new(edges)),
            MutatorPool::for_bytes(),
            Box::new(corpus),
        )
    }

    fn engine(seeds: &[&[u8]]) -> MutationEngine<u8> {
        engine_with(&SgFuzzConfig::default(), byte_harness, seeds)
    }

    #[test]
    fn fuzz_one_without_any_parent_fails() {
        let mut engine = engine(&[]);
        assert!(matches!(engine.fuzz_one(), Err(EngineError::NoParentAvailable)));
        assert_eq!(engine.stats().executions, 0);
    }

    #[test]
    fn interesting_success_is_admitted_with_its_triggered_edges() {
        let mut engine = engine(&[]);
        let mut round = RoundReport::default();

        let shared = engine
            .execute_and_classify(vec![1, 2, 3].into(), &mut round)
            .expect("success is returned as the next parent");
        assert!(shared.is_admitted());
        assert_eq!(shared.triggered_edges(), &HashSet::from([1, 2, 3]));
        assert_eq!(engine.corpus().len(), 1);
        assert_eq!(engine.scheduler().len(), 1);
        assert_eq!(round.interesting, 1);

        // Same edges again: still a valid parent, but not interesting.
        let repeat = engine
            .execute_and_classify(vec![3, 2, 1].into(), &mut round)
            .unwrap();
        assert!(!repeat.is_admitted());
        assert_eq!(repeat.triggered_edges(), &HashSet::from([1, 2, 3]));
        assert_eq!(engine.corpus().len(), 1);
        assert_eq!(engine.stats().valid, 2);
        assert_eq!(engine.stats().interesting, 1);
    }

    #[test]
    fn crashes_are_reported_and_deduplicated() {
        let mut engine = engine(&[]);
        let mut round = RoundReport::default();
        for _ in 0..2 {
            let next = engine.execute_and_classify(b"BAD".to_vec().into(), &mut round);
            assert!(next.is_none(), "a crash never becomes the parent");
        }
        assert_eq!(round.crashes.len(), 2);
        assert_eq!(round.crashes[0].signal, crate::executor::PANIC_SIGNAL);
        assert!(round.crashes[0].stderr.contains("bad sequence"));
        assert!(round.crashes[0].is_unique);
        assert!(!round.crashes[1].is_unique);
        assert_eq!(engine.stats().crashes, 2);
        assert_eq!(engine.stats().unique_crashes, 1);
        assert!(engine.scheduler().is_empty());
    }

    #[test]
    fn failures_are_counted_and_discarded() {
        let mut engine = engine(&[]);
        let mut round = RoundReport::default();
        let next = engine.execute_and_classify(vec![0, 5].into(), &mut round);
        assert!(next.is_none());
        assert_eq!(engine.stats().invalid, 1);
        assert_eq!(engine.corpus().len(), 0);
    }

    #[test]
    fn rounds_grow_seed_groups_from_corpus_seeds() {
        let mut engine = engine(&[b"AB", b"xyz"]);
        for _ in 0..20 {
            engine.fuzz_one().unwrap();
        }
        let stats = *engine.stats();
        assert_eq!(stats.rounds, 20);
        assert_eq!(stats.executions + stats.abandoned_steps, 20 * 5);
        assert!(stats.interesting > 0);
        assert_eq!(engine.corpus().len() as u64, 2 + stats.interesting);
        assert!(!engine.scheduler().is_empty());
        for group in engine.scheduler().groups() {
            assert!(group.len() <= 10);
            for program in group.programs() {
                assert!(program.is_admitted());
                assert!(!program.triggered_edges().is_empty());
                assert!(!program.contributors().is_empty());
            }
        }
        let successes: u64 = engine.mutator_stats().iter().map(|(_, s)| s.successes).sum();
        assert!(successes >= stats.executions);
    }

    #[test]
    fn same_seed_gives_same_run() {
        // Without a group limit, no placement depends on measured execution time.
        let mut config = SgFuzzConfig::default();
        config.scheduler.max_groups = usize::MAX;
        let run = || {
            let mut engine = engine_with(&config, byte_harness, &[b"seed"]);
            for _ in 0..10 {
                engine.fuzz_one().unwrap();
            }
            (*engine.stats(), engine.scheduler().summaries())
        };
        let (first_stats, first_groups) = run();
        let (second_stats, second_groups) = run();
        assert_eq!(first_stats.interesting, second_stats.interesting);
        assert_eq!(first_stats.crashes, second_stats.crashes);
        assert_eq!(first_groups, second_groups);
    }

    #[test]
    fn prepare_for_mutating_prepends_prefix_once() {
        let engine = engine(&[]).with_prefix(vec![9]);
        let mut parent: Program<u8> = vec![1, 2].into();
        parent.add_contributor("FlipSingleByteMutator");
        parent.mark_admitted();

        let prepared = engine.prepare_for_mutating(&parent);
        assert_eq!(prepared.code(), &[9, 1, 2]);
        assert_eq!(prepared.contributors(), &["FlipSingleByteMutator"]);
        assert!(!prepared.is_admitted());

        let again = engine.prepare_for_mutating(&prepared);
        assert_eq!(again.code(), &[9, 1, 2]);
    }

    #[test]
    fn success_after_a_crash_is_credited_only_with_its_own_edges() {
        let mut engine = engine(&[]);
        let mut round = RoundReport::default();
        assert!(
            engine
                .execute_and_classify(b"BAD".to_vec().into(), &mut round)
                .is_none()
        );

        let shared = engine
            .execute_and_classify(vec![1].into(), &mut round)
            .expect("success is returned as the next parent");
        assert!(shared.is_admitted());
        assert_eq!(shared.triggered_edges(), &HashSet::from([1]));
        let summaries = engine.scheduler().summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].new_edge_counts, vec![1]);

        // The crash's edges were never evaluated, so a success reaching them is still new.
        let shared = engine
            .execute_and_classify(b"ABD".to_vec().into(), &mut round)
            .unwrap();
        assert!(shared.is_admitted());
        assert_eq!(engine.stats().interesting, 2);
    }

    /// Accepts seeds up front but refuses every later addition.
    struct RefusingCorpus {
        seeds: Vec<Arc<Program<u8>>>,
    }

    impl Corpus<u8> for RefusingCorpus {
        fn add(&mut self, _program: Arc<Program<u8>>) -> Result<usize, CorpusError> {
            Err(CorpusError::Io("disk full".to_string()))
        }

        fn get(&self, id: usize) -> Result<&Arc<Program<u8>>, CorpusError> {
            self.seeds.get(id).ok_or(CorpusError::InputNotFound(id))
        }

        fn random_select(
            &self,
            _rng: &mut dyn rand_core::RngCore,
        ) -> Result<(usize, &Arc<Program<u8>>), CorpusError> {
            self.seeds
                .first()
                .map(|program| (0, program))
                .ok_or(CorpusError::CorpusIsEmpty)
        }

        fn len(&self) -> usize {
            self.seeds.len()
        }
    }

    #[test]
    fn corpus_refusal_keeps_the_round_and_its_crashes() {
        let edges = shared_edge_map();
        let executor = InProcessExecutor::new(byte_harness, edges.clone(), Duration::from_secs(5));
        let corpus = RefusingCorpus {
            seeds: vec![Arc::new(b"AB".to_vec().into())],
        };
        let mut engine = MutationEngine::new(
            &SgFuzzConfig::default(),
            Box::new(executor),
            Box::new(EdgeCoverageEvaluator::new(edges)),
            MutatorPool::for_bytes(),
            Box::new(corpus),
        );
        let mut round = RoundReport::default();

        assert!(
            engine
                .execute_and_classify(b"BAD".to_vec().into(), &mut round)
                .is_none()
        );
        let shared = engine
            .execute_and_classify(vec![7].into(), &mut round)
            .expect("success is still the next parent");
        assert!(shared.is_admitted());
        assert_eq!(engine.scheduler().len(), 1);
        assert_eq!(engine.corpus().len(), 1);
        assert_eq!(round.crashes.len(), 1);
        assert_eq!(round.interesting, 1);

        for _ in 0..5 {
            assert!(engine.fuzz_one().is_ok());
        }
        assert_eq!(engine.corpus().len(), 1);
    }

    fn diagnostics_config() -> SgFuzzConfig {
        let mut config = SgFuzzConfig::default();
        config.fuzzer.enable_diagnostics = true;
        config
    }

    #[test]
    fn diagnostics_compare_the_two_reruns() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        // Ok, Err, Ok, ...: the candidate succeeds, then its reruns disagree.
        let flaky = move |data: &[u8], edges: &mut EdgeMap| -> Result<(), String> {
            edges.hit(data[0] as u32);
            if counter.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                Ok(())
            } else {
                Err("flaky".to_string())
            }
        };
        let mut engine = engine_with(&diagnostics_config(), flaky, &[]);
        let mut round = RoundReport::default();
        assert!(engine.execute_and_classify(vec![4].into(), &mut round).is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(engine.stats().nondeterministic, 1);
        assert_eq!(engine.stats().executions, 1, "diagnostic runs are not counted");
        assert_eq!(engine.stats().valid, 1);
    }

    #[test]
    fn diagnostics_ignore_reruns_that_agree() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        // Err, Ok, Ok: differs from the first run but the reruns agree.
        let settles = move |_: &[u8], _: &mut EdgeMap| -> Result<(), String> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("cold start".to_string())
            } else {
                Ok(())
            }
        };
        let mut engine = engine_with(&diagnostics_config(), settles, &[]);
        let mut round = RoundReport::default();
        assert!(engine.execute_and_classify(vec![4].into(), &mut round).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(engine.stats().nondeterministic, 0);
        assert_eq!(engine.stats().invalid, 1);
    }

    #[test]
    fn diagnostics_rerun_crashing_candidates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        // Crash, Ok, Err.
        let flaky_crash = move |_: &[u8], _: &mut EdgeMap| -> Result<(), String> {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => panic!("first run crashes"),
                1 => Ok(()),
                _ => Err("flaky".to_string()),
            }
        };
        let mut engine = engine_with(&diagnostics_config(), flaky_crash, &[]);
        let mut round = RoundReport::default();
        assert!(engine.execute_and_classify(vec![4].into(), &mut round).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(round.crashes.len(), 1);
        assert_eq!(engine.stats().crashes, 1, "reruns are not filed as crashes");
        assert_eq!(engine.stats().nondeterministic, 1);
    }

    #[test]
    fn diagnostics_are_off_by_default() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let counting = move |_: &[u8], _: &mut EdgeMap| -> Result<(), String> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        let mut engine = engine_with(&SgFuzzConfig::default(), counting, &[]);
        let mut round = RoundReport::default();
        engine.execute_and_classify(vec![4].into(), &mut round);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
