use crate::program::{Instruction, Program};
use log::{debug, warn};
use rand::Rng;
use rand_core::RngCore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can arise during corpus operations.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// The requested entry ID was not found within the corpus.
    #[error("Input ID {0} not found in corpus")]
    InputNotFound(usize),

    /// An operation could not be performed because the corpus is empty
    /// (e.g., attempting to select an entry randomly).
    #[error("Corpus is empty, cannot select an input")]
    CorpusIsEmpty,

    /// Reading seed files or directories failed.
    #[error("Corpus I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CorpusError {
    fn from(err: std::io::Error) -> Self {
        CorpusError::Io(err.to_string())
    }
}

/// A flat collection of every program the engine has found interesting,
/// plus the initial seeds.
///
/// Seed groups only hold a bounded, curated subset; the corpus is the
/// fallback source of parents and the donor pool for splicing.
///
/// # Type Parameters
/// * `I`: The instruction type of the stored programs.
pub trait Corpus<I: Instruction>: Send + Sync {
    /// Stores a program.
    ///
    /// # Arguments
    /// * `program`: The program to keep. It is shared with the seed groups,
    ///   so the corpus only holds another reference to it.
    ///
    /// # Returns
    /// The ID assigned to the new entry, or a `CorpusError` if the program
    /// could not be stored.
    fn add(&mut self, program: Arc<Program<I>>) -> Result<usize, CorpusError>;

    /// Looks up an entry by the ID `add` returned.
    ///
    /// # Returns
    /// The stored program, or `CorpusError::InputNotFound` for an unknown ID.
    fn get(&self, id: usize) -> Result<&Arc<Program<I>>, CorpusError>;

    /// Picks an entry uniformly at random.
    ///
    /// # Arguments
    /// * `rng`: The engine's random number generator.
    ///
    /// # Returns
    /// The chosen entry with its ID, or `CorpusError::CorpusIsEmpty` if there
    /// is nothing to choose from.
    fn random_select(&self, rng: &mut dyn RngCore) -> Result<(usize, &Arc<Program<I>>), CorpusError>;

    /// Number of stored programs.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An in-memory implementation of the `Corpus` trait.
///
/// Entries live in a `Vec` for the lifetime of the engine and are never removed.
#[derive(Debug)]
pub struct InMemoryCorpus<I: Instruction> {
    entries: Vec<Arc<Program<I>>>,
}

impl<I: Instruction> InMemoryCorpus<I> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Program<I>>> {
        self.entries.iter()
    }
}

impl<I: Instruction> Default for InMemoryCorpus<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Instruction> Corpus<I> for InMemoryCorpus<I> {
    fn add(&mut self, program: Arc<Program<I>>) -> Result<usize, CorpusError> {
        let id = self.entries.len();
        self.entries.push(program);
        Ok(id)
    }

    fn get(&self, id: usize) -> Result<&Arc<Program<I>>, CorpusError> {
        self.entries.get(id).ok_or(CorpusError::InputNotFound(id))
    }

    fn random_select(&self, rng: &mut dyn RngCore) -> Result<(usize, &Arc<Program<I>>), CorpusError> {
        if self.entries.is_empty() {
            return Err(CorpusError::CorpusIsEmpty);
        }
        let index = rng.random_range(0..self.entries.len());
        Ok((index, &self.entries[index]))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<I: Instruction> InMemoryCorpus<I>
where
    Program<I>: From<Vec<u8>>,
{
    /// Loads raw byte seeds from the given paths.
    ///
    /// Each path can be a seed file or a directory; directories are read one
    /// level deep. Empty files are skipped since an empty program can never be
    /// mutated. Returns the number of seeds added.
    pub fn load_initial_seeds(&mut self, seed_paths: &[PathBuf]) -> Result<usize, CorpusError> {
        let mut loaded_count = 0;
        for path in seed_paths {
            if path.is_file() {
                loaded_count += self.load_seed_file(path)?;
            } else if path.is_dir() {
                let entries = fs::read_dir(path).map_err(|e| {
                    CorpusError::Io(format!("Failed to read seed directory {:?}: {}", path, e))
                })?;
                for entry in entries {
                    let entry = entry.map_err(|e| {
                        CorpusError::Io(format!("Error reading entry in {:?}: {}", path, e))
                    })?;
                    let file_path = entry.path();
                    if file_path.is_file() {
                        loaded_count += self.load_seed_file(&file_path)?;
                    }
                }
            } else {
                warn!("Seed path {:?} does not exist, skipping", path);
            }
        }
        debug!("Loaded {} initial seed(s)", loaded_count);
        Ok(loaded_count)
    }

    fn load_seed_file(&mut self, path: &Path) -> Result<usize, CorpusError> {
        let bytes = fs::read(path)
            .map_err(|e| CorpusError::Io(format!("Failed to read seed file {:?}: {}", path, e)))?;
        if bytes.is_empty() {
            debug!("Skipping empty seed file {:?}", path);
            return Ok(0);
        }
        self.add(Arc::new(Program::from(bytes)))?;
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn in_memory_corpus_add_get_len_is_empty() {
        let mut corpus: InMemoryCorpus<u8> = InMemoryCorpus::new();
        assert!(corpus.is_empty());
        assert_eq!(corpus.len(), 0);

        let id1 = corpus.add(Arc::new(vec![1, 2, 3].into())).unwrap();
        let id2 = corpus.add(Arc::new(vec![4, 5].into())).unwrap();
        assert_eq!((id1, id2), (0, 1));
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.get(id1).unwrap().code(), &[1, 2, 3]);
        assert!(matches!(corpus.get(99), Err(CorpusError::InputNotFound(99))));
    }

    #[test]
    fn in_memory_corpus_random_select_behavior() {
        let mut corpus: InMemoryCorpus<u8> = InMemoryCorpus::new();
        let mut rng = ChaCha8Rng::from_seed([42; 32]);
        assert!(matches!(
            corpus.random_select(&mut rng),
            Err(CorpusError::CorpusIsEmpty)
        ));

        for byte in [b'A', b'B', b'C'] {
            corpus.add(Arc::new(vec![byte].into())).unwrap();
        }

        let mut selected_ids_counts = HashMap::new();
        for _ in 0..100 {
            let (id, program) = corpus.random_select(&mut rng).unwrap();
            assert_eq!(program.code(), corpus.get(id).unwrap().code());
            *selected_ids_counts.entry(id).or_insert(0) += 1;
        }
        assert_eq!(selected_ids_counts.len(), 3, "All entries should be selected");
    }

    #[test]
    fn load_initial_seeds_reads_files_and_directories() -> Result<(), CorpusError> {
        let mut corpus: InMemoryCorpus<u8> = InMemoryCorpus::new();
        let temp_dir = tempdir().unwrap();
        let seed1 = temp_dir.path().join("s1.bin");
        let seed2 = temp_dir.path().join("s2.txt");
        fs::write(&seed1, [1, 2]).unwrap();
        fs::write(&seed2, [3, 4, 5]).unwrap();
        let seed_dir = temp_dir.path().join("s_dir");
        fs::create_dir(&seed_dir).unwrap();
        fs::write(seed_dir.join("s3.dat"), [6]).unwrap();
        fs::write(seed_dir.join("empty.dat"), b"").unwrap();

        let paths = vec![seed1, seed_dir, seed2, temp_dir.path().join("missing")];
        let count = corpus.load_initial_seeds(&paths)?;
        assert_eq!(count, 3, "the empty seed file is skipped");
        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus.get(0)?.code(), &[1, 2]);
        assert!(corpus.iter().all(|program| !program.is_admitted()));
        Ok(())
    }
}
