use crate::corpus::Corpus;
use crate::program::{Instruction, Program};
use anyhow::{anyhow, bail};
use log::debug;
use rand::Rng;
use rand_core::RngCore;

/// A `Mutator` derives a new program from a parent.
///
/// The returned program is fresh: unadmitted, without execution metadata and
/// without contributors. The `MutatorPool` records provenance.
///
/// An `Err` is a routine outcome (the parent was too small, no donor was
/// available, ...) and simply makes the engine try another mutator.
///
/// # Type Parameters
/// * `I`: The instruction type of the programs this mutator rewrites.
pub trait Mutator<I: Instruction>: Send {
    /// Stable name, used as the contributor tag and as the key of the pool's statistics.
    fn name(&self) -> &'static str;

    /// Derives one child program from `parent`.
    ///
    /// # Arguments
    /// * `parent`: The program to derive from. It is never modified.
    /// * `rng`: Source of every random decision.
    /// * `corpus`: Optional donor pool for mutators that combine programs.
    ///   Mutators that need a donor fail when it is `None` or empty.
    ///
    /// # Returns
    /// `Result<Program<I>, anyhow::Error>`:
    ///   - `Ok(child)`: The new program. It may be empty; the engine discards those.
    ///   - `Err(error)`: This mutator does not apply to `parent`.
    fn mutate(
        &mut self,
        parent: &Program<I>,
        rng: &mut dyn RngCore,
        corpus: Option<&dyn Corpus<I>>,
    ) -> Result<Program<I>, anyhow::Error>;
}

/// Exchanges two instructions at distinct positions.
#[derive(Debug, Default, Clone, Copy)]
pub struct SwapInstructionsMutator;

impl<I: Instruction> Mutator<I> for SwapInstructionsMutator {
    fn name(&self) -> &'static str {
        "SwapInstructionsMutator"
    }

    fn mutate(
        &mut self,
        parent: &Program<I>,
        rng: &mut dyn RngCore,
        _corpus: Option<&dyn Corpus<I>>,
    ) -> Result<Program<I>, anyhow::Error> {
        let len = parent.size();
        if len < 2 {
            bail!("cannot swap instructions in a program of size {}", len);
        }
        let first = rng.random_range(0..len);
        // Offset in 1..len keeps the second index distinct from the first.
        let second = (first + rng.random_range(1..len)) % len;
        let mut code = parent.code().to_vec();
        code.swap(first, second);
        Ok(Program::new(code))
    }
}

/// Copies one instruction to a random position.
#[derive(Debug, Default, Clone, Copy)]
pub struct DuplicateInstructionMutator;

impl<I: Instruction> Mutator<I> for DuplicateInstructionMutator {
    fn name(&self) -> &'static str {
        "DuplicateInstructionMutator"
    }

    fn mutate(
        &mut self,
        parent: &Program<I>,
        rng: &mut dyn RngCore,
        _corpus: Option<&dyn Corpus<I>>,
    ) -> Result<Program<I>, anyhow::Error> {
        if parent.is_empty() {
            bail!("cannot duplicate an instruction of an empty program");
        }
        let mut code = parent.code().to_vec();
        let source = rng.random_range(0..code.len());
        let target = rng.random_range(0..=code.len());
        let instruction = code[source].clone();
        code.insert(target, instruction);
        Ok(Program::new(code))
    }
}

/// Drops one instruction. Never produces an empty program.
#[derive(Debug, Default, Clone, Copy)]
pub struct RemoveInstructionMutator;

impl<I: Instruction> Mutator<I> for RemoveInstructionMutator {
    fn name(&self) -> &'static str {
        "RemoveInstructionMutator"
    }

    fn mutate(
        &mut self,
        parent: &Program<I>,
        rng: &mut dyn RngCore,
        _corpus: Option<&dyn Corpus<I>>,
    ) -> Result<Program<I>, anyhow::Error> {
        if parent.size() < 2 {
            bail!("removing from a program of size {} would leave it empty", parent.size());
        }
        let mut code = parent.code().to_vec();
        code.remove(rng.random_range(0..code.len()));
        Ok(Program::new(code))
    }
}

/// Inserts a slice of a random corpus program into the parent.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpliceMutator;

impl<I: Instruction> Mutator<I> for SpliceMutator {
    fn name(&self) -> &'static str {
        "SpliceMutator"
    }

    fn mutate(
        &mut self,
        parent: &Program<I>,
        rng: &mut dyn RngCore,
        corpus: Option<&dyn Corpus<I>>,
    ) -> Result<Program<I>, anyhow::Error> {
        let corpus = corpus.ok_or_else(|| anyhow!("splicing needs a corpus"))?;
        let (_, donor) = corpus.random_select(rng)?;
        if donor.is_empty() {
            bail!("selected splice donor is empty");
        }
        let start = rng.random_range(0..donor.size());
        let end = rng.random_range(start + 1..=donor.size());
        let insert_at = rng.random_range(0..=parent.size());

        let mut code = Vec::with_capacity(parent.size() + end - start);
        code.extend_from_slice(&parent.code()[..insert_at]);
        code.extend_from_slice(&donor.code()[start..end]);
        code.extend_from_slice(&parent.code()[insert_at..]);
        Ok(Program::new(code))
    }
}

/// Randomly selects a single byte and adds a small random value to it.
///
/// An empty parent is treated as a single zero byte.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlipSingleByteMutator;

impl Mutator<u8> for FlipSingleByteMutator {
    fn name(&self) -> &'static str {
        "FlipSingleByteMutator"
    }

    fn mutate(
        &mut self,
        parent: &Program<u8>,
        rng: &mut dyn RngCore,
        _corpus: Option<&dyn Corpus<u8>>,
    ) -> Result<Program<u8>, anyhow::Error> {
        let mut bytes = parent.code().to_vec();
        if bytes.is_empty() {
            bytes.push(0);
        }
        let delta = rng.random_range(1u8..=15u8);
        let index = rng.random_range(0..bytes.len());
        bytes[index] = bytes[index].wrapping_add(delta);
        Ok(Program::from(bytes))
    }
}

/// Per-mutator bookkeeping.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MutatorStats {
    pub successes: u64,
    pub failures: u64,
    /// Net instructions added across successful mutations (result size minus parent size).
    pub added_instructions: i64,
}

/// A set of mutators, one of which is picked at random for every attempt.
pub struct MutatorPool<I: Instruction> {
    entries: Vec<(Box<dyn Mutator<I>>, MutatorStats)>,
}

impl<I: Instruction> MutatorPool<I> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// The instruction-agnostic mutators.
    pub fn structural() -> Self {
        Self::new()
            .with(SwapInstructionsMutator)
            .with(DuplicateInstructionMutator)
            .with(RemoveInstructionMutator)
            .with(SpliceMutator)
    }

    pub fn with(mut self, mutator: impl Mutator<I> + 'static) -> Self {
        self.push(Box::new(mutator));
        self
    }

    pub fn push(&mut self, mutator: Box<dyn Mutator<I>>) {
        self.entries.push((mutator, MutatorStats::default()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies one randomly chosen mutator to `parent`.
    ///
    /// On success the child inherits the parent's contributors followed by
    /// the name of the mutator that produced it.
    pub fn mutate(
        &mut self,
        parent: &Program<I>,
        rng: &mut dyn RngCore,
        corpus: Option<&dyn Corpus<I>>,
    ) -> Result<Program<I>, anyhow::Error> {
        if self.entries.is_empty() {
            bail!("mutator pool is empty");
        }
        let index = rng.random_range(0..self.entries.len());
        let (mutator, stats) = &mut self.entries[index];
        match mutator.mutate(parent, rng, corpus) {
            Ok(mut child) => {
                stats.successes += 1;
                stats.added_instructions += child.size() as i64 - parent.size() as i64;
                child.add_contributors(parent.contributors());
                child.add_contributor(mutator.name());
                Ok(child)
            }
            Err(e) => {
                stats.failures += 1;
                debug!("{} failed: {}", mutator.name(), e);
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> Vec<(&'static str, MutatorStats)> {
        self.entries
            .iter()
            .map(|(mutator, stats)| (mutator.name(), *stats))
            .collect()
    }
}

impl<I: Instruction> Default for MutatorPool<I> {
    fn default() -> Self {
        Self::structural()
    }
}

impl MutatorPool<u8> {
    /// Structural mutators plus byte-level value changes.
    pub fn for_bytes() -> Self {
        Self::structural().with(FlipSingleByteMutator)
    }
}
