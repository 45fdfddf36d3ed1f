use crate::config::SeedGroupSettings;
use crate::feedback::CoverageAspects;
use crate::program::{Instruction, Program};
use log::debug;
use rand::seq::IndexedRandom;
use rand_core::RngCore;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug)]
struct Member<I: Instruction> {
    program: Arc<Program<I>>,
    aspects: CoverageAspects,
    /// Starts at 1 on insertion; bumped each time the member is picked as a parent.
    age: u32,
}

impl<I: Instruction> Member<I> {
    fn new_edge_count(&self) -> usize {
        self.aspects.count()
    }

    /// New edges found per time the member has been mutated.
    fn efficiency(&self) -> f64 {
        self.aspects.count() as f64 / self.age as f64
    }
}

/// Serializable snapshot of a seed group, for logs and dumps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub member_count: usize,
    pub ages: Vec<u32>,
    pub new_edge_counts: Vec<usize>,
    pub program_sizes: Vec<usize>,
    pub edge_union_size: usize,
    pub times_selected: u64,
}

/// A bounded cluster of programs with a similar coverage footprint.
///
/// Members are kept in insertion order. `edge_union` is rebuilt from the
/// members after every change so it never goes stale across evictions.
#[derive(Debug)]
pub struct SeedGroup<I: Instruction> {
    members: Vec<Member<I>>,
    edge_union: HashSet<u32>,
    times_selected: u64,
    settings: SeedGroupSettings,
}

impl<I: Instruction> SeedGroup<I> {
    pub fn new(settings: SeedGroupSettings) -> Self {
        Self {
            members: Vec::new(),
            edge_union: HashSet::new(),
            times_selected: 0,
            settings,
        }
    }

    /// Builds a group from `(program, aspects, age)` triples without running
    /// the admission policy.
    #[cfg(test)]
    pub(crate) fn with_members(
        settings: SeedGroupSettings,
        members: Vec<(Arc<Program<I>>, CoverageAspects, u32)>,
    ) -> Self {
        let mut group = Self::new(settings);
        for (program, aspects, age) in members {
            program.mark_admitted();
            group.members.push(Member {
                program,
                aspects,
                age,
            });
        }
        group.rebuild_edge_union();
        group
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn programs(&self) -> impl Iterator<Item = &Arc<Program<I>>> {
        self.members.iter().map(|member| &member.program)
    }

    pub fn ages(&self) -> Vec<u32> {
        self.members.iter().map(|member| member.age).collect()
    }

    pub fn new_edge_counts(&self) -> Vec<usize> {
        self.members.iter().map(Member::new_edge_count).collect()
    }

    /// Union of every member's triggered-edge set.
    pub fn edge_union(&self) -> &HashSet<u32> {
        &self.edge_union
    }

    /// Number of fuzzing rounds in which this group supplied the parent.
    pub fn times_selected(&self) -> u64 {
        self.times_selected
    }

    pub(crate) fn mark_selected(&mut self) {
        self.times_selected += 1;
    }

    /// Inserts `program` unless it already belongs to a group.
    ///
    /// Stale members (older than `max_member_age`) are pruned first while the
    /// group is over capacity. If the insertion pushes the group over
    /// capacity, every member tied for the lowest efficiency is evicted.
    /// Returns `false` if the program had already been admitted.
    pub fn add_member(&mut self, program: Arc<Program<I>>, aspects: CoverageAspects) -> bool {
        if !program.mark_admitted() {
            return false;
        }

        // Eviction below restores the cap on every insertion, so this only
        // fires for a group that starts out over capacity.
        while self.members.len() > self.settings.member_cap {
            let before = self.members.len();
            let max_age = self.settings.max_member_age;
            self.members.retain(|member| member.age <= max_age);
            if self.members.len() == before {
                break;
            }
            debug!(
                "Pruned {} stale member(s) from seed group",
                before - self.members.len()
            );
        }

        self.members.push(Member {
            program,
            aspects,
            age: 1,
        });

        if self.members.len() > self.settings.member_cap {
            self.evict_least_efficient();
        }
        self.rebuild_edge_union();
        true
    }

    fn evict_least_efficient(&mut self) {
        let min_ratio = self
            .members
            .iter()
            .map(Member::efficiency)
            .fold(f64::INFINITY, f64::min);
        let before = self.members.len();
        self.members
            .retain(|member| member.efficiency() != min_ratio);
        debug!(
            "Evicted {} least efficient member(s) (ratio {:.3}) from seed group",
            before - self.members.len(),
            min_ratio
        );
    }

    fn rebuild_edge_union(&mut self) {
        self.edge_union = self
            .members
            .iter()
            .flat_map(|member| member.program.triggered_edges().iter().copied())
            .collect();
    }

    /// Picks the member with the best new-edges-per-age ratio and ages it.
    ///
    /// Ties go to the member with more new edges, then the younger one; any
    /// remaining tie is broken with `rng`.
    ///
    /// # Panics
    /// Panics if the group is empty.
    pub fn select_parent(&mut self, rng: &mut dyn RngCore) -> Arc<Program<I>> {
        assert!(
            !self.members.is_empty(),
            "select_parent called on an empty seed group"
        );

        if let Some(member) = self.members.iter_mut().find(|member| member.age == 0) {
            assert!(
                !member.program.is_empty(),
                "seed group member with age 0 has an empty program"
            );
            member.age += 1;
            return Arc::clone(&member.program);
        }

        let max_ratio = self
            .members
            .iter()
            .map(Member::efficiency)
            .fold(f64::NEG_INFINITY, f64::max);
        let tied: Vec<usize> = (0..self.members.len())
            .filter(|&idx| self.members[idx].efficiency() == max_ratio)
            .collect();
        let (best_count, best_age) = tied
            .iter()
            .map(|&idx| {
                let member = &self.members[idx];
                (member.new_edge_count(), member.age)
            })
            .reduce(|best, candidate| {
                if candidate.0 > best.0 || (candidate.0 == best.0 && candidate.1 < best.1) {
                    candidate
                } else {
                    best
                }
            })
            .expect("no maximum efficiency in a non-empty seed group");
        let finalists: Vec<usize> = tied
            .into_iter()
            .filter(|&idx| {
                let member = &self.members[idx];
                member.new_edge_count() == best_count && member.age == best_age
            })
            .collect();
        let chosen = *finalists
            .choose(rng)
            .expect("tie-break candidates cannot be empty");

        let member = &mut self.members[chosen];
        assert!(!member.program.is_empty(), "selected parent program is empty");
        member.age += 1;
        Arc::clone(&member.program)
    }

    /// Picks the member with the fewest instructions and ages it.
    pub fn select_with_min_size(&mut self) -> Option<Arc<Program<I>>> {
        let member = self
            .members
            .iter_mut()
            .min_by_key(|member| member.program.size())?;
        member.age += 1;
        Some(Arc::clone(&member.program))
    }

    /// Picks the member with the shortest recorded execution time and ages it.
    pub fn select_with_min_execution_time(&mut self) -> Option<Arc<Program<I>>> {
        let member = self
            .members
            .iter_mut()
            .min_by_key(|member| member.program.exec_time())?;
        member.age += 1;
        Some(Arc::clone(&member.program))
    }

    /// The member with the longest recorded execution time; the first one wins ties.
    pub fn representative_by_max_execution_time(&self) -> Option<&Arc<Program<I>>> {
        self.members
            .iter()
            .map(|member| &member.program)
            .reduce(|best, candidate| {
                if candidate.exec_time() > best.exec_time() {
                    candidate
                } else {
                    best
                }
            })
    }

    pub fn summary(&self) -> GroupSummary {
        GroupSummary {
            member_count: self.members.len(),
            ages: self.ages(),
            new_edge_counts: self.new_edge_counts(),
            program_sizes: self.programs().map(|program| program.size()).collect(),
            edge_union_size: self.edge_union.len(),
            times_selected: self.times_selected,
        }
    }
}
