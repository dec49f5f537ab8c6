use crate::error::PipelineError;
use crate::report::RunContext;
use crate::supermatrix::Supermatrix;
use crate::tools::{ConstrainedSearch, SpeciesTreeEstimator};
use crate::tree::{GeneTree, Node, Tree};
use crate::types::RootingMethod;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Majority-rule consensus over the surviving gene trees. Split
/// frequencies become support values on the consensus tree; a split at
/// exactly 50% is kept only if compatible with everything already
/// kept, ties broken by the input order of the first tree exhibiting
/// the split.
pub fn build_consensus(trees: &[GeneTree]) -> Result<Tree, PipelineError> {
    let first = trees.first().ok_or_else(|| PipelineError::StageExhaustion {
        stage: "consensus".to_string(),
        examined: 0,
    })?;
    let all: BTreeSet<String> = first.tree.leaf_labels().into_iter().collect();
    let reference = all
        .iter()
        .next()
        .ok_or_else(|| PipelineError::Parse("consensus input tree has no leaves".into()))?
        .clone();

    let mut counts: HashMap<BTreeSet<String>, (usize, usize)> = HashMap::new();
    for (i, gene_tree) in trees.iter().enumerate() {
        for split in gene_tree.tree.splits(&reference) {
            let entry = counts.entry(split).or_insert((0, i));
            entry.0 += 1;
        }
    }

    let n = trees.len();
    let mut eligible: Vec<(BTreeSet<String>, usize, usize)> = counts
        .into_iter()
        .filter(|(_, (count, _))| 2 * count >= n)
        .map(|(split, (count, first_seen))| (split, count, first_seen))
        .collect();
    eligible.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    let mut kept: Vec<(BTreeSet<String>, f64)> = Vec::new();
    for (split, count, _) in eligible {
        let compatible = kept.iter().all(|(other, _)| {
            split.is_disjoint(other) || split.is_subset(other) || other.is_subset(&split)
        });
        if compatible {
            kept.push((split, count as f64 / n as f64));
        }
    }
    // Largest clusters first so parents are created before children.
    kept.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut tree = Tree {
        nodes: vec![Node::default()],
        root: 0,
    };
    let mut cluster_nodes: Vec<(BTreeSet<String>, usize)> = Vec::new();
    for (split, freq) in &kept {
        // Attach under the smallest already-built cluster strictly
        // containing this one, falling back to the root.
        let parent = cluster_nodes
            .iter()
            .rev()
            .find(|(other, _)| split.is_subset(other) && split != other)
            .map(|(_, idx)| *idx)
            .unwrap_or(0);
        let idx = tree.nodes.len();
        tree.nodes.push(Node {
            parent: Some(parent),
            support: Some(*freq),
            ..Node::default()
        });
        tree.nodes[parent].children.push(idx);
        cluster_nodes.push((split.clone(), idx));
    }
    for taxon in &all {
        let parent = cluster_nodes
            .iter()
            .rev()
            .find(|(cluster, _)| cluster.contains(taxon))
            .map(|(_, idx)| *idx)
            .unwrap_or(0);
        let idx = tree.nodes.len();
        tree.nodes.push(Node {
            parent: Some(parent),
            label: Some(taxon.clone()),
            ..Node::default()
        });
        tree.nodes[parent].children.push(idx);
    }
    Ok(tree)
}

/// Final trees produced by the consensus stage.
#[derive(Debug)]
pub struct TreeOutputs {
    pub consensus: String,
    pub coalescent: Option<String>,
    pub constrained_ml: Option<String>,
}

/// Build the consensus tree, then invoke both external estimators.
/// One estimator failing degrades to a warning; both failing is fatal.
pub fn run_tree_estimation(
    trees: &[GeneTree],
    matrix: &Supermatrix,
    estimator: &dyn SpeciesTreeEstimator,
    searcher: &dyn ConstrainedSearch,
    rooting: Option<(RootingMethod, Option<&str>)>,
    workdir: &Path,
    ctx: &mut RunContext,
) -> Result<TreeOutputs, PipelineError> {
    let consensus = build_consensus(trees)?;
    let consensus_newick = consensus.to_newick();

    let coalescent = match estimator.estimate(trees, workdir) {
        Ok(newick) => Some(newick),
        Err(e) => {
            ctx.warn(format!("species-tree estimator failed: {:#}", e));
            None
        }
    };

    let constrained_ml = match searcher.search(matrix, Some(&consensus_newick), workdir) {
        Ok(newick) => match apply_rooting(&newick, rooting) {
            Ok(rooted) => Some(rooted),
            Err(e) => {
                ctx.warn(format!("rooting failed, keeping unrooted tree: {}", e));
                Some(newick)
            }
        },
        Err(e) => {
            ctx.warn(format!("constrained supermatrix search failed: {:#}", e));
            None
        }
    };

    if coalescent.is_none() && constrained_ml.is_none() {
        return Err(PipelineError::NoTreeEstimate(
            "both the coalescent estimator and the constrained search failed".into(),
        ));
    }
    Ok(TreeOutputs {
        consensus: consensus_newick,
        coalescent,
        constrained_ml,
    })
}

fn apply_rooting(
    newick: &str,
    rooting: Option<(RootingMethod, Option<&str>)>,
) -> Result<String, PipelineError> {
    let Some((method, outgroup)) = rooting else {
        return Ok(newick.to_string());
    };
    let tree = Tree::parse_newick(newick.trim())?;
    let rooted = match method {
        RootingMethod::Midpoint => tree.root_midpoint()?,
        RootingMethod::Outgroup => {
            let taxon = outgroup.ok_or_else(|| {
                PipelineError::Parse("outgroup rooting requested without an outgroup taxon".into())
            })?;
            tree.root_with_outgroup(taxon)?
        }
    };
    Ok(rooted.to_newick())
}
