pub mod config;
pub mod corpus;
pub mod coverage;
pub mod engine;
pub mod executor;
pub mod feedback;
pub mod mutator;
pub mod oracle;
pub mod program;
pub mod scheduler;
pub mod seed_group;
pub mod similarity;

pub use config::{ParentSelection, SchedulerSettings, SeedGroupSettings, SgFuzzConfig};
pub use corpus::{Corpus, CorpusError, InMemoryCorpus};
pub use coverage::{EdgeMap, SharedEdgeMap, edge_diff, shared_edge_map};
pub use engine::{EngineError, MutationEngine, RoundReport, Statistics};
pub use executor::{Execution, ExecutionOutcome, Executor, InProcessExecutor};
pub use feedback::{CoverageAspects, CoverageEvaluator, EdgeCoverageEvaluator};
pub use mutator::{FlipSingleByteMutator, Mutator, MutatorPool, MutatorStats};
pub use oracle::{CrashOracle, CrashReport};
pub use program::{Instruction, Program};
pub use scheduler::GroupScheduler;
pub use seed_group::{GroupSummary, SeedGroup};
pub use similarity::{opcode_overlap, semantic_similarity, syntactic_similarity};
