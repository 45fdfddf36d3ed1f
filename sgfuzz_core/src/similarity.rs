//! Similarity between a candidate program and a seed group.
//!
//! Semantic similarity looks at coverage (triggered edges), syntactic
//! similarity at program structure (opcodes of the group's representative).

use crate::program::{Instruction, Program};
use crate::seed_group::SeedGroup;
use std::collections::HashSet;

/// Size of the intersection of two edge sets.
pub fn edge_overlap(a: &HashSet<u32>, b: &HashSet<u32>) -> usize {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small.iter().filter(|&edge| large.contains(edge)).count()
}

/// Fraction of the group's edge union that the program also triggers.
///
/// Normalized by the group, not the candidate, so a broad group is harder to
/// match by overlap alone. An empty group yields `0.0`.
pub fn semantic_similarity<I: Instruction>(program: &Program<I>, group: &SeedGroup<I>) -> f64 {
    let union = group.edge_union();
    if union.is_empty() {
        return 0.0;
    }
    edge_overlap(program.triggered_edges(), union) as f64 / union.len() as f64
}

/// Counts equal pairs under full pairwise comparison (every element of `a`
/// against every element of `b`) and divides by the shorter length.
///
/// This is not a Jaccard index and can exceed 1.0 when opcodes repeat.
/// Returns `0.0` if either side is empty.
pub fn opcode_overlap<T: PartialEq>(a: &[T], b: &[T]) -> f64 {
    let shorter = a.len().min(b.len());
    if shorter == 0 {
        return 0.0;
    }
    let common = a
        .iter()
        .map(|x| b.iter().filter(|y| x == *y).count())
        .sum::<usize>();
    common as f64 / shorter as f64
}

/// Opcode overlap between the program and the group's slowest member.
pub fn syntactic_similarity<I: Instruction>(program: &Program<I>, group: &SeedGroup<I>) -> f64 {
    match group.representative_by_max_execution_time() {
        Some(representative) => opcode_overlap(&program.opcodes(), &representative.opcodes()),
        None => 0.0,
    }
}
