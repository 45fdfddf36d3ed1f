use crate::config::{ParentSelection, SchedulerSettings, SeedGroupSettings};
use crate::feedback::CoverageAspects;
use crate::program::{Instruction, Program};
use crate::seed_group::{GroupSummary, SeedGroup};
use crate::similarity::{edge_overlap, syntactic_similarity};
use log::debug;
use rand::seq::IndexedRandom;
use rand_core::RngCore;
use std::sync::Arc;

/// Indices of all entries equal to the extreme value picked by `better`.
fn extreme_indices(values: &[f64], better: fn(f64, f64) -> f64, start: f64) -> Vec<usize> {
    let extreme = values.iter().copied().fold(start, better);
    (0..values.len())
        .filter(|&idx| values[idx] == extreme)
        .collect()
}

/// Owns every seed group of one fuzzing engine and decides where new programs
/// go and which group supplies the next parent.
///
/// Groups are never merged, split or removed; a group emptied by eviction
/// stays in place.
#[derive(Debug)]
pub struct GroupScheduler<I: Instruction> {
    groups: Vec<SeedGroup<I>>,
    settings: SchedulerSettings,
    group_settings: SeedGroupSettings,
}

impl<I: Instruction> GroupScheduler<I> {
    pub fn new(settings: SchedulerSettings, group_settings: SeedGroupSettings) -> Self {
        Self {
            groups: Vec::new(),
            settings,
            group_settings,
        }
    }

    pub fn groups(&self) -> &[SeedGroup<I>] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn open_group(&mut self, program: Arc<Program<I>>, aspects: CoverageAspects) -> usize {
        let mut group = SeedGroup::new(self.group_settings);
        group.add_member(program, aspects);
        self.groups.push(group);
        debug!("Opened seed group #{}", self.groups.len() - 1);
        self.groups.len() - 1
    }

    /// Places an interesting program into a seed group and returns the group's index.
    ///
    /// The program joins the structurally closest existing group if its edge
    /// overlap with some group reaches the commonality threshold, or if the
    /// group limit is reached. Otherwise it opens a new group. Programs that
    /// already belong to a group are ignored (`None`).
    pub fn admit(
        &mut self,
        program: Arc<Program<I>>,
        aspects: CoverageAspects,
        rng: &mut dyn RngCore,
    ) -> Option<usize> {
        if program.is_admitted() {
            return None;
        }
        if self.groups.is_empty() {
            return Some(self.open_group(program, aspects));
        }

        let mut largest_overlap = 0;
        for group in &self.groups {
            let overlap = edge_overlap(program.triggered_edges(), group.edge_union());
            if overlap > largest_overlap {
                largest_overlap = overlap;
            }
        }
        let commonality = largest_overlap as f64 / self.settings.edge_budget;

        if commonality < self.settings.commonality_threshold
            && self.groups.len() < self.settings.max_groups
        {
            return Some(self.open_group(program, aspects));
        }

        let similarities: Vec<f64> = self
            .groups
            .iter()
            .map(|group| syntactic_similarity(&program, group))
            .collect();
        let best = extreme_indices(&similarities, f64::max, f64::NEG_INFINITY);
        let target = *best
            .choose(rng)
            .expect("no maximum similarity over a non-empty group list");
        debug!(
            "Merging program into seed group #{} (commonality {:.4}, syntactic similarity {:.3})",
            target, commonality, similarities[target]
        );
        self.groups[target].add_member(program, aspects);
        Some(target)
    }

    /// Picks the group that supplies the next parent and counts the selection.
    ///
    /// Groups that were never selected go first, in creation order. After
    /// that the group with the lowest priority wins, where priority weighs the
    /// group's edge overlap with the other groups against how often it has
    /// already been picked. Returns `None` if there are no groups.
    pub fn select_group_for_mutation(&mut self, rng: &mut dyn RngCore) -> Option<usize> {
        if self.groups.is_empty() {
            return None;
        }

        if let Some(idx) = self.groups.iter().position(|g| g.times_selected() == 0) {
            self.groups[idx].mark_selected();
            return Some(idx);
        }

        let priorities: Vec<f64> = (0..self.groups.len())
            .map(|idx| self.priority(idx))
            .collect();
        let lowest = extreme_indices(&priorities, f64::min, f64::INFINITY);
        let idx = *lowest
            .choose(rng)
            .expect("no minimum priority over a non-empty group list");
        self.groups[idx].mark_selected();
        Some(idx)
    }

    /// Only the overlap with the last other group in scheduler order counts
    /// towards the redundancy term.
    fn priority(&self, idx: usize) -> f64 {
        let group = &self.groups[idx];
        let mut common = 0;
        for (other_idx, other) in self.groups.iter().enumerate() {
            if other_idx != idx {
                common = edge_overlap(group.edge_union(), other.edge_union());
            }
        }
        self.settings.redundancy_weight * common as f64
            + self.settings.selection_weight * group.times_selected() as f64
    }

    /// Selects a group and asks it for a parent.
    ///
    /// Returns `None` if there are no groups or the chosen group has been
    /// emptied by eviction; the caller then falls back to the corpus.
    pub fn next_parent(&mut self, rng: &mut dyn RngCore) -> Option<Arc<Program<I>>> {
        let idx = self.select_group_for_mutation(rng)?;
        let group = &mut self.groups[idx];
        if group.is_empty() {
            debug!("Seed group #{idx} is empty, no parent available");
            return None;
        }
        match self.settings.parent_selection {
            ParentSelection::NewestEfficiency => Some(group.select_parent(rng)),
            ParentSelection::MinSize => group.select_with_min_size(),
            ParentSelection::MinExecutionTime => group.select_with_min_execution_time(),
        }
    }

    pub fn summaries(&self) -> Vec<GroupSummary> {
        self.groups.iter().map(SeedGroup::summary).collect()
    }
}
