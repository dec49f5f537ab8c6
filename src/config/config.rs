use crate::types::CombinePolicy;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;

/// Quantitative thresholds driving the filter stages. Loaded from an
/// optional on-disk config; individual CLI flags override fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    /// Significance level for the recombination screen; both p-values
    /// must exceed it for a locus to pass.
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// Minimum leaves a gene tree needs to carry topological signal.
    #[serde(default = "default_min_leaves")]
    pub min_leaves: usize,

    /// Outlier-screen stringency; smaller is stricter.
    #[serde(default = "default_stringency")]
    pub stringency: f64,

    /// Minimum mean branch support on the common 0-1 scale.
    #[serde(default = "default_min_support")]
    pub min_support: f64,

    /// Minimum percentage of fully resolved quartets for the
    /// likelihood-resolution screen.
    #[serde(default = "default_min_resolved")]
    pub min_resolved: f64,

    /// Soft-warning floor for the surviving set size.
    #[serde(default = "default_min_survivors_warn")]
    pub min_survivors_warn: usize,

    /// Ceiling on concurrent workers; further clamped to available
    /// processing units at run time.
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Minimum taxa per locus for the structural screen.
    #[serde(default = "default_min_taxa")]
    pub min_taxa: usize,
}

fn default_alpha() -> f64 {
    0.05
}

fn default_min_leaves() -> usize {
    4
}

fn default_stringency() -> f64 {
    1.5
}

fn default_min_support() -> f64 {
    0.7
}

fn default_min_resolved() -> f64 {
    70.0
}

fn default_min_survivors_warn() -> usize {
    10
}

fn default_min_taxa() -> usize {
    4
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            alpha: default_alpha(),
            min_leaves: default_min_leaves(),
            stringency: default_stringency(),
            min_support: default_min_support(),
            min_resolved: default_min_resolved(),
            min_survivors_warn: default_min_survivors_warn(),
            max_workers: None,
            min_taxa: default_min_taxa(),
        }
    }
}

impl Thresholds {
    pub fn load() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("org", "phylomark", "phylomark") {
            let config_path = proj_dirs.config_dir().join("config.toml");
            if config_path.exists() {
                if let Ok(content) = fs::read_to_string(config_path) {
                    if let Ok(config) = toml::from_str(&content) {
                        return config;
                    }
                }
            }
        }
        Thresholds::default()
    }
}

/// Default combine policy for the signal/resolution screens when the
/// CLI does not say otherwise.
pub fn default_combine_policy() -> CombinePolicy {
    CombinePolicy::Intersection
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_in_defaults() {
        let t: Thresholds = toml::from_str("alpha = 0.01").unwrap();
        assert!((t.alpha - 0.01).abs() < 1e-12);
        assert_eq!(t.min_leaves, 4);
        assert!((t.min_support - 0.7).abs() < 1e-12);
        assert_eq!(t.max_workers, None);
    }
}
