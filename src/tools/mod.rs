pub mod decode;
pub mod process;

use crate::repository::{Alignment, Locus};
use crate::supermatrix::Supermatrix;
use crate::tree::GeneTree;
use crate::types::MoleculeType;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

/// Outcome of the recombination-test collaborator for one alignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecombVerdict {
    PValues { normal: f64, permutation: f64 },
    /// Too few informative sites to run the test.
    Inconclusive,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutlierCall {
    Ok,
    Outlier,
}

/// Result of pooling gene trees through the outlier collaborator. The
/// collaborator is optional; its absence degrades the owning stage
/// rather than failing the run.
#[derive(Debug)]
pub enum OutlierOutcome {
    Calls(HashMap<u32, OutlierCall>),
    Unavailable(String),
}

pub trait Aligner: Sync {
    fn align(&self, locus: &Locus, molecule: MoleculeType, workdir: &Path) -> Result<Alignment>;
}

pub trait RecombinationTest: Sync {
    fn test(&self, alignment: &Alignment, workdir: &Path) -> Result<RecombVerdict>;
}

pub trait TreeSearch: Sync {
    fn search(&self, alignment: &Alignment, workdir: &Path) -> Result<GeneTree>;
}

pub trait OutlierTest {
    fn detect(&self, trees: &[GeneTree], stringency: f64, workdir: &Path)
        -> Result<OutlierOutcome>;
}

pub trait LikelihoodMapping: Sync {
    fn percent_resolved(&self, alignment: &Alignment, workdir: &Path) -> Result<f64>;
}

pub trait SpeciesTreeEstimator {
    fn estimate(&self, trees: &[GeneTree], workdir: &Path) -> Result<String>;
}

pub trait ConstrainedSearch {
    fn search(
        &self,
        matrix: &Supermatrix,
        constraint: Option<&str>,
        workdir: &Path,
    ) -> Result<String>;
}

/// Probe a collaborator binary up front so a missing tool surfaces
/// before any per-locus work is dispatched.
pub fn check_tool(bin: &str, probe_arg: &str, hint: &str) -> Result<()> {
    Command::new(bin)
        .arg(probe_arg)
        .output()
        .with_context(|| format!("{} not found. {}", bin, hint))
        .map(|_| ())
}

pub fn check_iqtree(bin: &str) -> Result<()> {
    check_tool(
        bin,
        "--version",
        "Install IQ-TREE (http://www.iqtree.org/) and ensure it's in your PATH",
    )
}

pub fn check_phi(bin: &str) -> Result<()> {
    check_tool(
        bin,
        "-h",
        "Install PhiPack (https://www.maths.otago.ac.nz/~dbryant/software.html) and ensure it's in your PATH",
    )
}

pub fn check_mafft(bin: &str) -> Result<()> {
    check_tool(
        bin,
        "--version",
        "Install MAFFT (https://mafft.cbrc.jp/) and ensure it's in your PATH",
    )
}
