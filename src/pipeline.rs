//! Stage ordering and branch-dependent control flow for a full run.
//! Collaborators arrive as trait objects so the whole engine runs
//! against mocks in tests.

use crate::consensus::{self, TreeOutputs};
use crate::error::PipelineError;
use crate::report::RunContext;
use crate::repository::Locus;
use crate::stages::{
    self, FilterStage, Verdict, WorkItem, outlier::OutlierScreen,
    recombination::RecombinationScreen, resolution::ResolutionScreen, signal::SignalScreen,
    structural::StructuralScreen, trivial::TrivialTreeScreen,
};
use crate::supermatrix;
use crate::tools::{
    Aligner, ConstrainedSearch, LikelihoodMapping, OutlierTest, RecombinationTest,
    SpeciesTreeEstimator, TreeSearch,
};
use crate::types::{CombinePolicy, MoleculeType, RootingMethod};
use std::fs;

pub struct Collaborators<'a> {
    pub aligner: &'a dyn Aligner,
    pub recombination: &'a dyn RecombinationTest,
    pub tree_search: &'a dyn TreeSearch,
    pub outlier: &'a dyn OutlierTest,
    /// None disables the likelihood-resolution screen (engine without
    /// likelihood mapping, or user opt-out).
    pub likelihood_mapping: Option<&'a dyn LikelihoodMapping>,
    pub species_tree: &'a dyn SpeciesTreeEstimator,
    pub constrained_search: &'a dyn ConstrainedSearch,
}

/// Run the ordered filter stages over the ingested loci and return
/// the surviving working set.
pub fn run_filtering(
    loci: Vec<Locus>,
    collab: &Collaborators,
    molecule: MoleculeType,
    workers: usize,
    combine: CombinePolicy,
    ctx: &mut RunContext,
) -> Result<Vec<WorkItem>, PipelineError> {
    let items: Vec<WorkItem> = loci.into_iter().map(WorkItem::new).collect();

    let items = stages::apply(
        &StructuralScreen {
            aligner: collab.aligner,
            molecule,
            workers,
        },
        items,
        ctx,
    )?;
    let items = stages::apply(
        &RecombinationScreen {
            test: collab.recombination,
            workers,
        },
        items,
        ctx,
    )?;
    let items = stages::apply(
        &TrivialTreeScreen {
            search: collab.tree_search,
            workers,
        },
        items,
        ctx,
    )?;
    let items = stages::apply(
        &OutlierScreen {
            test: collab.outlier,
        },
        items,
        ctx,
    )?;

    match collab.likelihood_mapping {
        None => stages::apply(&SignalScreen, items, ctx),
        Some(mapping) => {
            let resolution = ResolutionScreen { mapping, workers };
            match combine {
                CombinePolicy::Intersection => {
                    let items = stages::apply(&SignalScreen, items, ctx)?;
                    stages::apply(&resolution, items, ctx)
                }
                CombinePolicy::Union => {
                    let mut items = items;
                    let signal = SignalScreen.evaluate(&mut items, ctx)?;
                    let resolved = resolution.evaluate(&mut items, ctx)?;
                    let merged = signal
                        .into_iter()
                        .zip(resolved)
                        .map(|pair| match pair {
                            (Verdict::Pass, _) | (_, Verdict::Pass) => Verdict::Pass,
                            (Verdict::Inconclusive(note), _)
                            | (_, Verdict::Inconclusive(note)) => Verdict::Inconclusive(note),
                            (Verdict::Fail(a), Verdict::Fail(b)) => {
                                Verdict::Fail(format!("{}; {}", a, b))
                            }
                        })
                        .collect();
                    stages::apply_verdicts("signal_or_resolution", items, merged, ctx)
                }
            }
        }
    }
}

/// Concatenate the survivors, derive the consensus and species trees,
/// and register every produced artifact.
pub fn assemble_and_estimate(
    items: &[WorkItem],
    collab: &Collaborators,
    molecule: MoleculeType,
    rooting: Option<(RootingMethod, Option<&str>)>,
    ctx: &mut RunContext,
) -> Result<TreeOutputs, PipelineError> {
    let alignments: Vec<_> = items
        .iter()
        .filter_map(|item| item.alignment.clone())
        .collect();
    let trees: Vec<_> = items.iter().filter_map(|item| item.tree.clone()).collect();

    let matrix = supermatrix::concatenate(&alignments)?;
    let stripped = supermatrix::strip_uninformative(&matrix, molecule);

    let out_dir = ctx.stage_dir("supermatrix")?;
    let raw_path = out_dir.join("supermatrix_raw.fasta");
    matrix
        .write_fasta(&raw_path)
        .map_err(|e| PipelineError::Parse(format!("{:#}", e)))?;
    let stripped_path = out_dir.join("supermatrix_informative.fasta");
    stripped
        .write_fasta(&stripped_path)
        .map_err(|e| PipelineError::Parse(format!("{:#}", e)))?;
    let partitions_path = out_dir.join("partitions.txt");
    matrix
        .write_partitions(&partitions_path)
        .map_err(|e| PipelineError::Parse(format!("{:#}", e)))?;
    ctx.register_artifact("supermatrix_raw", &raw_path);
    ctx.register_artifact("supermatrix_informative", &stripped_path);
    ctx.register_artifact("supermatrix_partitions", &partitions_path);

    let tree_dir = ctx.stage_dir("trees")?;
    let gene_trees_path = tree_dir.join("surviving_gene_trees.nwk");
    let mut text = String::new();
    for t in &trees {
        text.push_str(&t.tree.to_newick());
        text.push('\n');
    }
    fs::write(&gene_trees_path, text)?;
    ctx.register_artifact("surviving_gene_trees", &gene_trees_path);

    let outputs = consensus::run_tree_estimation(
        &trees,
        &stripped,
        collab.species_tree,
        collab.constrained_search,
        rooting,
        &tree_dir,
        ctx,
    )?;

    let consensus_path = tree_dir.join("consensus.nwk");
    fs::write(&consensus_path, format!("{}\n", outputs.consensus))?;
    ctx.register_artifact("consensus_tree", &consensus_path);
    if let Some(newick) = &outputs.coalescent {
        let path = tree_dir.join("species_coalescent.nwk");
        fs::write(&path, format!("{}\n", newick))?;
        ctx.register_artifact("species_tree_coalescent", &path);
    }
    if let Some(newick) = &outputs.constrained_ml {
        let path = tree_dir.join("species_ml.nwk");
        fs::write(&path, format!("{}\n", newick))?;
        ctx.register_artifact("species_tree_ml", &path);
    }
    Ok(outputs)
}
