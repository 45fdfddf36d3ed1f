use crate::coverage::SharedEdgeMap;
use crate::executor::{Execution, ExecutionOutcome};
use std::collections::HashSet;

/// The new coverage discovered by one execution.
///
/// The scheduler only ever looks at [`CoverageAspects::count`]; the edge ids are
/// kept for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageAspects {
    new_edges: Vec<u32>,
}

impl CoverageAspects {
    pub fn new(mut new_edges: Vec<u32>) -> Self {
        new_edges.sort_unstable();
        Self { new_edges }
    }

    /// An aspects token of the given size, for callers that only track counts.
    pub fn with_count(count: usize) -> Self {
        Self {
            new_edges: (0..count as u32).collect(),
        }
    }

    pub fn count(&self) -> usize {
        self.new_edges.len()
    }

    pub fn new_edges(&self) -> &[u32] {
        &self.new_edges
    }
}

impl std::fmt::Display for CoverageAspects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} new edge(s)", self.new_edges.len())
    }
}

/// Decides whether an execution is interesting and exposes the raw hit counters
/// that the engine snapshots around every execution.
///
/// Implementations keep their own notion of "already seen" coverage; the engine
/// only tells them which edges a single execution touched.
pub trait CoverageEvaluator: Send + Sync {
    /// Name used in logs and the CLI banner.
    fn name(&self) -> &'static str;

    /// Point-in-time copy of the per-edge hit counters.
    ///
    /// # Returns
    /// One counter per edge id. The engine diffs the copies taken before and
    /// after an execution to find the edges that execution triggered.
    fn edge_hit_counts(&self) -> Vec<u32>;

    /// Judges the execution that just finished.
    ///
    /// # Arguments
    /// * `execution`: The result of running the candidate. Only a
    ///   `Succeeded` execution can be interesting.
    /// * `triggered`: The edges whose counters changed during this execution
    ///   and no other. Hits left behind by earlier runs must not be credited
    ///   to this one.
    ///
    /// # Returns
    /// `Some(aspects)` naming the edges of `triggered` this evaluator has never
    /// seen before, or `None` if there are none. A `Some` result marks those
    /// edges as seen.
    fn evaluate(
        &mut self,
        execution: &Execution,
        triggered: &HashSet<u32>,
    ) -> Option<CoverageAspects>;
}

/// Treats an execution as interesting when it hit at least one edge that no
/// earlier evaluated execution has hit.
pub struct EdgeCoverageEvaluator {
    edges: SharedEdgeMap,
    seen: HashSet<u32>,
}

impl EdgeCoverageEvaluator {
    pub fn new(edges: SharedEdgeMap) -> Self {
        Self {
            edges,
            seen: HashSet::new(),
        }
    }

    pub fn seen_edges(&self) -> usize {
        self.seen.len()
    }
}

impl CoverageEvaluator for EdgeCoverageEvaluator {
    fn name(&self) -> &'static str {
        "EdgeCoverageEvaluator"
    }

    fn edge_hit_counts(&self) -> Vec<u32> {
        self.edges.lock().snapshot()
    }

    fn evaluate(
        &mut self,
        execution: &Execution,
        triggered: &HashSet<u32>,
    ) -> Option<CoverageAspects> {
        if execution.outcome != ExecutionOutcome::Succeeded {
            return None;
        }
        let fresh: Vec<u32> = triggered
            .iter()
            .copied()
            .filter(|edge| !self.seen.contains(edge))
            .collect();
        if fresh.is_empty() {
            return None;
        }
        self.seen.extend(fresh.iter().copied());
        Some(CoverageAspects::new(fresh))
    }
}
