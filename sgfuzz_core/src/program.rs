use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A single operation of a program.
///
/// The scheduler never interprets instructions; it only compares their opcodes
/// (for syntactic similarity) and lifts them to text for logs and crash reports.
pub trait Instruction: Clone + Send + Sync + Debug + 'static {
    /// Opaque, comparable token identifying the kind of operation.
    type Opcode: PartialEq + Debug;

    fn opcode(&self) -> Self::Opcode;

    /// Human-readable form of the instruction, one line.
    fn lift(&self) -> String;
}

impl Instruction for u8 {
    type Opcode = u8;

    fn opcode(&self) -> u8 {
        *self
    }

    fn lift(&self) -> String {
        format!("{:#04x}", self)
    }
}

/// A program together with the execution metadata the seed-group scheduler needs.
///
/// The code is fixed at construction. Execution time and the triggered-edge set are
/// filled in by the engine while the program is still uniquely owned; once it is
/// shared (`Arc<Program<I>>`) only the one-shot admission flag changes.
#[derive(Debug)]
pub struct Program<I: Instruction> {
    code: Vec<I>,
    exec_time: Duration,
    triggered_edges: HashSet<u32>,
    contributors: Vec<&'static str>,
    admitted: AtomicBool,
}

impl<I: Instruction> Program<I> {
    pub fn new(code: Vec<I>) -> Self {
        Self {
            code,
            exec_time: Duration::ZERO,
            triggered_edges: HashSet::new(),
            contributors: Vec::new(),
            admitted: AtomicBool::new(false),
        }
    }

    pub fn code(&self) -> &[I] {
        &self.code
    }

    /// Number of instructions.
    pub fn size(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn exec_time(&self) -> Duration {
        self.exec_time
    }

    pub fn set_exec_time(&mut self, exec_time: Duration) {
        self.exec_time = exec_time;
    }

    pub fn triggered_edges(&self) -> &HashSet<u32> {
        &self.triggered_edges
    }

    pub fn set_triggered_edges(&mut self, edges: HashSet<u32>) {
        self.triggered_edges = edges;
    }

    pub fn opcodes(&self) -> Vec<I::Opcode> {
        self.code.iter().map(Instruction::opcode).collect()
    }

    /// Names of the mutators that contributed to this program, oldest first.
    pub fn contributors(&self) -> &[&'static str] {
        &self.contributors
    }

    pub fn add_contributors(&mut self, names: &[&'static str]) {
        self.contributors.extend_from_slice(names);
    }

    pub fn add_contributor(&mut self, name: &'static str) {
        self.contributors.push(name);
    }

    pub fn is_admitted(&self) -> bool {
        self.admitted.load(Ordering::Acquire)
    }

    /// Sets the admission flag, returning `true` if this call was the one that set it.
    pub fn mark_admitted(&self) -> bool {
        !self.admitted.swap(true, Ordering::AcqRel)
    }

    /// Textual listing of the program, one instruction per line.
    pub fn lift(&self) -> String {
        self.code
            .iter()
            .enumerate()
            .map(|(idx, instr)| format!("{idx:>4}: {}", instr.lift()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl<I: Instruction> Clone for Program<I> {
    /// Clones code and metadata, but the copy starts out unadmitted.
    fn clone(&self) -> Self {
        Self {
            code: self.code.clone(),
            exec_time: self.exec_time,
            triggered_edges: self.triggered_edges.clone(),
            contributors: self.contributors.clone(),
            admitted: AtomicBool::new(false),
        }
    }
}

impl From<Vec<u8>> for Program<u8> {
    fn from(bytes: Vec<u8>) -> Self {
        Program::new(bytes)
    }
}
