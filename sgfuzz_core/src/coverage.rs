use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Per-edge hit counters, indexed by edge id.
///
/// Counters are cumulative over the whole fuzzing session. The map grows on
/// demand when an edge beyond the current length is hit, which is why two
/// snapshots taken around one execution may differ in length.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EdgeMap {
    hits: Vec<u32>,
}

impl EdgeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_len(len: usize) -> Self {
        Self {
            hits: vec![0; len],
        }
    }

    /// Records one hit of `edge`, growing the map if needed.
    pub fn hit(&mut self, edge: u32) {
        let idx = edge as usize;
        if idx >= self.hits.len() {
            self.hits.resize(idx + 1, 0);
        }
        self.hits[idx] = self.hits[idx].saturating_add(1);
    }

    pub fn hits(&self) -> &[u32] {
        &self.hits
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Copy of the current counters.
    pub fn snapshot(&self) -> Vec<u32> {
        self.hits.clone()
    }

    /// Ids of all edges hit at least once.
    pub fn covered_edges(&self) -> impl Iterator<Item = u32> + '_ {
        self.hits
            .iter()
            .enumerate()
            .filter(|(_, count)| **count != 0)
            .map(|(idx, _)| idx as u32)
    }
}

/// Edge map shared between an executor (which writes it) and a coverage evaluator (which reads it).
pub type SharedEdgeMap = Arc<Mutex<EdgeMap>>;

pub fn shared_edge_map() -> SharedEdgeMap {
    Arc::new(Mutex::new(EdgeMap::new()))
}

/// Returns the indices at which two hit-count snapshots differ.
///
/// The shorter snapshot is treated as if right-padded with zeros, so edges
/// that appeared between the two snapshots are reported whenever their count
/// in the longer one is non-zero.
pub fn edge_diff(before: &[u32], after: &[u32]) -> HashSet<u32> {
    let len = before.len().max(after.len());
    (0..len)
        .filter(|&idx| {
            let old = before.get(idx).copied().unwrap_or(0);
            let new = after.get(idx).copied().unwrap_or(0);
            old.abs_diff(new) != 0
        })
        .map(|idx| idx as u32)
        .collect()
}
