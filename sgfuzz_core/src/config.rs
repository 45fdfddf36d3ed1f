use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SeedGroupSettings {
    #[serde(default = "default_member_cap")]
    pub member_cap: usize,
    #[serde(default = "default_max_member_age")]
    pub max_member_age: u32,
}

fn default_member_cap() -> usize {
    10
}

fn default_max_member_age() -> u32 {
    15
}

impl Default for SeedGroupSettings {
    fn default() -> Self {
        Self {
            member_cap: default_member_cap(),
            max_member_age: default_max_member_age(),
        }
    }
}

/// How a member is picked once a group has been chosen.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ParentSelection {
    #[default]
    NewestEfficiency,
    MinSize,
    MinExecutionTime,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SchedulerSettings {
    #[serde(default = "default_max_groups")]
    pub max_groups: usize,
    /// Overlap ratio at or above which a program joins an existing group.
    #[serde(default = "default_commonality_threshold")]
    pub commonality_threshold: f64,
    /// Assumed number of reachable edges; denominator of the commonality ratio.
    #[serde(default = "default_edge_budget")]
    pub edge_budget: f64,
    #[serde(default = "default_redundancy_weight")]
    pub redundancy_weight: f64,
    #[serde(default = "default_selection_weight")]
    pub selection_weight: f64,
    #[serde(default)]
    pub parent_selection: ParentSelection,
}

fn default_max_groups() -> usize {
    10
}
fn default_commonality_threshold() -> f64 {
    0.3
}
pub fn default_edge_budget() -> f64 {
    777_508.0 * 0.25
}
fn default_redundancy_weight() -> f64 {
    0.9
}
fn default_selection_weight() -> f64 {
    0.1
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_groups: default_max_groups(),
            commonality_threshold: default_commonality_threshold(),
            edge_budget: default_edge_budget(),
            redundancy_weight: default_redundancy_weight(),
            selection_weight: default_selection_weight(),
            parent_selection: ParentSelection::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ExecutorSettings {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub harness_key: String,
}

fn default_timeout_ms() -> u64 {
    2000
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            harness_key: String::new(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CorpusSettings {
    pub initial_seed_paths: Option<Vec<PathBuf>>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_iterations")]
    pub max_iterations: u64,
    #[serde(default = "default_consecutive_mutations")]
    pub consecutive_mutations: usize,
    #[serde(default = "default_max_mutation_attempts")]
    pub max_mutation_attempts: usize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub enable_diagnostics: bool,
}

pub fn default_iterations() -> u64 {
    1_000_000
}
fn default_consecutive_mutations() -> usize {
    5
}
fn default_max_mutation_attempts() -> usize {
    10
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_iterations(),
            consecutive_mutations: default_consecutive_mutations(),
            max_mutation_attempts: default_max_mutation_attempts(),
            seed: 0,
            enable_diagnostics: false,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SgFuzzConfig {
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub seed_groups: SeedGroupSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub corpus: CorpusSettings,
}

impl SgFuzzConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;
        Self::from_toml_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
