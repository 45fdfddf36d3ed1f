use sgfuzz_core::config::SgFuzzConfig;
use sgfuzz_core::corpus::{Corpus, InMemoryCorpus};
use sgfuzz_core::coverage::{EdgeMap, shared_edge_map};
use sgfuzz_core::engine::{EngineError, MutationEngine};
use sgfuzz_core::executor::InProcessExecutor;
use sgfuzz_core::feedback::EdgeCoverageEvaluator;
use sgfuzz_core::mutator::MutatorPool;

use clap::Parser;
use log::{info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

type Harness = fn(&[u8], &mut EdgeMap) -> Result<(), String>;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    #[clap(short, long)]
    iterations: Option<u64>,
    /// Overrides the RNG seed from the config.
    #[clap(short, long)]
    seed: Option<u64>,
    /// Writes a JSON summary of every seed group to this path when done.
    #[clap(long, value_parser)]
    dump_groups: Option<PathBuf>,
}

/// Each matched byte of "FUZZ" is its own edge; the full match crashes.
fn magic_bytes_harness(data: &[u8], edges: &mut EdgeMap) -> Result<(), String> {
    edges.hit(0);
    for (depth, (&have, &want)) in data.iter().zip(b"FUZZ").enumerate() {
        if have != want {
            return Ok(());
        }
        edges.hit(depth as u32 + 1);
    }
    if data.len() >= 4 {
        panic!("magic bytes reached");
    }
    Ok(())
}

/// Rejects inputs with a leading zero, crashes on "BAD" and "CRAS" prefixes.
fn bad_crash_harness(data: &[u8], edges: &mut EdgeMap) -> Result<(), String> {
    match data.first() {
        None => return Err("empty input".to_string()),
        Some(0) => return Err("leading zero byte".to_string()),
        Some(&first) => edges.hit(first as u32),
    }
    if data.starts_with(b"BA") {
        edges.hit(256);
        if data.starts_with(b"BAD") {
            panic!("BAD input detected by harness!");
        }
    }
    if data.starts_with(b"CR") {
        edges.hit(257);
        if data.starts_with(b"CRA") {
            edges.hit(258);
            if data.starts_with(b"CRAS") {
                panic!("CRASH input detected by harness!");
            }
        }
    }
    Ok(())
}

fn harness_for(key: &str) -> Result<Harness, anyhow::Error> {
    match key {
        "" | "magic-bytes" => Ok(magic_bytes_harness),
        "bad-crash" => Ok(bad_crash_harness),
        other => Err(anyhow::anyhow!(
            "Unknown harness '{}'; expected 'magic-bytes' or 'bad-crash'",
            other
        )),
    }
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match cli.config_file {
        Some(config_path) => {
            info!("Loading configuration from specified path: {config_path:?}");
            SgFuzzConfig::load_from_file(&config_path)?
        }
        None => {
            let default_config_path = PathBuf::from("config.toml");
            if default_config_path.exists() {
                info!("No config file specified via CLI, loading default: {default_config_path:?}");
                SgFuzzConfig::load_from_file(&default_config_path)?
            } else {
                info!("No config file specified and default 'config.toml' not found, using built-in defaults.");
                SgFuzzConfig::default()
            }
        }
    };

    if let Some(iterations) = cli.iterations {
        config.fuzzer.max_iterations = iterations;
    }
    if let Some(seed) = cli.seed {
        config.fuzzer.seed = seed;
    }
    info!("Effective configuration: {config:#?}");

    let harness = harness_for(&config.executor.harness_key)?;
    let edges = shared_edge_map();
    let executor = InProcessExecutor::new(
        harness,
        edges.clone(),
        Duration::from_millis(config.executor.timeout_ms),
    );

    let mut corpus: InMemoryCorpus<u8> = InMemoryCorpus::new();
    if let Some(seed_paths) = &config.corpus.initial_seed_paths {
        corpus.load_initial_seeds(seed_paths)?;
    }
    if corpus.is_empty() {
        corpus.add(Arc::new(b"INIT".to_vec().into()))?;
    }
    let initial_corpus_len = corpus.len();

    let mut engine = MutationEngine::new(
        &config,
        Box::new(executor),
        Box::new(EdgeCoverageEvaluator::new(edges)),
        MutatorPool::for_bytes(),
        Box::new(corpus),
    );

    info!("Coverage feedback: {}", engine.evaluator_name());

    let max_iterations = config.fuzzer.max_iterations;
    println!(
        "Starting fuzz loop for {} iterations with {} initial corpus items...",
        max_iterations, initial_corpus_len
    );
    let start_time = Instant::now();

    for i in 0..max_iterations {
        match engine.fuzz_one() {
            Ok(_) => {}
            Err(EngineError::NoParentAvailable) => {
                warn!("No parent available, stopping after {i} iterations");
                break;
            }
            Err(e) => return Err(e.into()),
        }

        if i > 0 && i % (max_iterations / 100).max(1) == 0 {
            let stats = engine.stats();
            let elapsed = start_time.elapsed().as_secs_f32();
            let exec_per_sec = if elapsed > 0.0 {
                stats.executions as f32 / elapsed
            } else {
                0.0
            };
            print!(
                "\rIter: {}/{}, Corpus: {}, Groups: {}, Crashes: {}, Execs/sec: {:.2}   ",
                i,
                max_iterations,
                engine.corpus().len(),
                engine.scheduler().len(),
                stats.unique_crashes,
                exec_per_sec
            );
            std::io::stdout().flush()?;
        }
    }

    let elapsed_total = start_time.elapsed();
    let stats = engine.stats();
    println!("\nFuzz loop finished in {elapsed_total:.2?}.");
    println!(
        "Total Executions: {}, Corpus Size: {}, Seed Groups: {}, Unique Crashes: {} ({} total)",
        stats.executions,
        engine.corpus().len(),
        engine.scheduler().len(),
        stats.unique_crashes,
        stats.crashes
    );
    println!(
        "Interesting: {}, Valid: {}, Invalid: {}, Timed out: {}, Abandoned steps: {}",
        stats.interesting, stats.valid, stats.invalid, stats.timed_out, stats.abandoned_steps
    );
    for (name, mutator_stats) in engine.mutator_stats() {
        println!(
            "  {:<28} ok {:>8}  failed {:>8}  added {:>8}",
            name,
            mutator_stats.successes,
            mutator_stats.failures,
            mutator_stats.added_instructions
        );
    }

    if let Some(path) = cli.dump_groups {
        let json = serde_json::to_string_pretty(&engine.scheduler().summaries())?;
        std::fs::write(&path, json)
            .map_err(|e| anyhow::anyhow!("Failed to write group dump to {:?}: {}", path, e))?;
        info!("Wrote seed group summaries to {path:?}");
    }

    Ok(())
}
