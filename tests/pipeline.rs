//! End-to-end pipeline runs against mock collaborators: the boundary
//! filtering scenario, the zero-survivor fatal path, and the
//! signal/resolution combine policies.

use anyhow::Result;
use phylomark::config::Thresholds;
use phylomark::error::PipelineError;
use phylomark::pipeline::{self, Collaborators};
use phylomark::report::RunContext;
use phylomark::repository::{Alignment, Locus, SeqRecord};
use phylomark::tools::{
    Aligner, ConstrainedSearch, LikelihoodMapping, OutlierCall, OutlierOutcome, OutlierTest,
    RecombVerdict, RecombinationTest, SpeciesTreeEstimator, TreeSearch,
};
use phylomark::tree::{GeneTree, Tree};
use phylomark::types::{CombinePolicy, MoleculeType, RootingMethod};
use std::collections::HashMap;
use std::path::Path;
use tempfile::TempDir;

const TAXA: [&str; 4] = ["t1", "t2", "t3", "t4"];

fn locus(id: u32, name: &str, seqs: [&str; 4]) -> Locus {
    let records = |seqs: [&str; 4]| -> Vec<SeqRecord> {
        TAXA.iter()
            .zip(seqs)
            .map(|(taxon, seq)| SeqRecord {
                taxon: taxon.to_string(),
                seq: seq.to_string(),
            })
            .collect()
    };
    Locus {
        id,
        name: name.to_string(),
        nuc: records(seqs),
        prot: records(["MK", "MK", "MK", "MK"]),
        source: name.into(),
    }
}

struct PassthroughAligner;

impl Aligner for PassthroughAligner {
    fn align(&self, locus: &Locus, _molecule: MoleculeType, _workdir: &Path) -> Result<Alignment> {
        Ok(Alignment {
            locus_id: locus.id,
            locus_name: locus.name.clone(),
            taxa: locus.nuc.iter().map(|r| r.taxon.clone()).collect(),
            rows: locus.nuc.iter().map(|r| r.seq.clone()).collect(),
        })
    }
}

struct TableRecombTest {
    verdicts: HashMap<String, RecombVerdict>,
}

impl RecombinationTest for TableRecombTest {
    fn test(&self, alignment: &Alignment, _workdir: &Path) -> Result<RecombVerdict> {
        Ok(*self
            .verdicts
            .get(&alignment.locus_name)
            .unwrap_or(&RecombVerdict::PValues {
                normal: 0.9,
                permutation: 0.9,
            }))
    }
}

struct FixedTreeSearch {
    newick: String,
}

impl TreeSearch for FixedTreeSearch {
    fn search(&self, alignment: &Alignment, _workdir: &Path) -> Result<GeneTree> {
        Ok(GeneTree {
            locus_id: alignment.locus_id,
            locus_name: alignment.locus_name.clone(),
            tree: Tree::parse_newick(&self.newick).unwrap(),
            model: "GTR".into(),
        })
    }
}

struct NamedOutlierTest {
    outliers: Vec<String>,
}

impl OutlierTest for NamedOutlierTest {
    fn detect(
        &self,
        trees: &[GeneTree],
        _stringency: f64,
        _workdir: &Path,
    ) -> Result<OutlierOutcome> {
        Ok(OutlierOutcome::Calls(
            trees
                .iter()
                .map(|t| {
                    let call = if self.outliers.contains(&t.locus_name) {
                        OutlierCall::Outlier
                    } else {
                        OutlierCall::Ok
                    };
                    (t.locus_id, call)
                })
                .collect(),
        ))
    }
}

struct MissingOutlierTest;

impl OutlierTest for MissingOutlierTest {
    fn detect(
        &self,
        _trees: &[GeneTree],
        _stringency: f64,
        _workdir: &Path,
    ) -> Result<OutlierOutcome> {
        Ok(OutlierOutcome::Unavailable("Rscript not installed".into()))
    }
}

struct TableLmap {
    percents: HashMap<String, f64>,
}

impl LikelihoodMapping for TableLmap {
    fn percent_resolved(&self, alignment: &Alignment, _workdir: &Path) -> Result<f64> {
        Ok(*self.percents.get(&alignment.locus_name).unwrap_or(&95.0))
    }
}

struct FixedEstimator;

impl SpeciesTreeEstimator for FixedEstimator {
    fn estimate(&self, _trees: &[GeneTree], _workdir: &Path) -> Result<String> {
        Ok("((t1,t2),(t3,t4));".into())
    }
}

struct FailingEstimator;

impl SpeciesTreeEstimator for FailingEstimator {
    fn estimate(&self, _trees: &[GeneTree], _workdir: &Path) -> Result<String> {
        anyhow::bail!("estimator crashed")
    }
}

struct FixedSearch;

impl ConstrainedSearch for FixedSearch {
    fn search(
        &self,
        _matrix: &phylomark::supermatrix::Supermatrix,
        _constraint: Option<&str>,
        _workdir: &Path,
    ) -> Result<String> {
        Ok("((t1:0.1,t2:0.1):0.05,(t3:0.1,t4:0.2):0.05);".into())
    }
}

fn thresholds() -> Thresholds {
    let mut t = Thresholds::default();
    t.min_survivors_warn = 0;
    t
}

fn four_loci() -> Vec<Locus> {
    vec![
        // Fails the structural screen: an empty record.
        locus(0, "broken", ["", "ACGT", "ACGT", "ACGT"]),
        locus(1, "recombinant", ["ACGT", "ACGA", "ACTT", "AGGT"]),
        locus(2, "outlier", ["ACGT", "ACGA", "ACTT", "AGGT"]),
        locus(3, "clean", ["ACGT", "ACGA", "ACTT", "AGGT"]),
    ]
}

#[test]
fn boundary_scenario_keeps_exactly_one_locus() {
    let dir = TempDir::new().unwrap();
    let mut ctx = RunContext::new(thresholds(), dir.path().to_path_buf());

    let aligner = PassthroughAligner;
    let recomb = TableRecombTest {
        verdicts: HashMap::from([(
            "recombinant".to_string(),
            RecombVerdict::PValues {
                normal: 0.01,
                permutation: 0.2,
            },
        )]),
    };
    let search = FixedTreeSearch {
        newick: "((t1:0.1,t2:0.1)0.9:0.05,(t3:0.1,t4:0.1)0.9:0.05);".into(),
    };
    let outlier = NamedOutlierTest {
        outliers: vec!["outlier".to_string()],
    };
    let estimator = FixedEstimator;
    let constrained = FixedSearch;
    let collab = Collaborators {
        aligner: &aligner,
        recombination: &recomb,
        tree_search: &search,
        outlier: &outlier,
        likelihood_mapping: None,
        species_tree: &estimator,
        constrained_search: &constrained,
    };

    let items = pipeline::run_filtering(
        four_loci(),
        &collab,
        MoleculeType::Nucleotide,
        2,
        CombinePolicy::Intersection,
        &mut ctx,
    )
    .unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].locus.name, "clean");

    // Examined counts across the four decisive stages: {4, 3, 2, 1}.
    let by_stage: HashMap<&str, _> = ctx
        .ledger
        .snapshot()
        .iter()
        .map(|(name, c)| (name.as_str(), *c))
        .collect();
    assert_eq!(by_stage["structural"].examined, 4);
    assert_eq!(by_stage["recombination"].examined, 3);
    assert_eq!(by_stage["topological_outlier"].examined, 2);
    assert_eq!(by_stage["phylogenetic_signal"].examined, 1);
    assert_eq!(ctx.ledger.last_survivors(), Some(1));
    assert!(ctx.ledger.is_monotonic());

    // The one survivor assembles into supermatrix and trees.
    let outputs =
        pipeline::assemble_and_estimate(&items, &collab, MoleculeType::Nucleotide, None, &mut ctx)
            .unwrap();
    assert!(outputs.coalescent.is_some());
    assert!(outputs.constrained_ml.is_some());
    assert!(dir
        .path()
        .join("supermatrix")
        .join("supermatrix_raw.fasta")
        .exists());
}

#[test]
fn recombination_wipeout_is_fatal_and_produces_no_supermatrix() {
    let dir = TempDir::new().unwrap();
    let mut ctx = RunContext::new(thresholds(), dir.path().to_path_buf());

    let aligner = PassthroughAligner;
    let significant = RecombVerdict::PValues {
        normal: 0.01,
        permutation: 0.01,
    };
    let recomb = TableRecombTest {
        verdicts: HashMap::from([
            ("recombinant".to_string(), significant),
            ("outlier".to_string(), significant),
            ("clean".to_string(), significant),
        ]),
    };
    let search = FixedTreeSearch {
        newick: "((t1,t2)0.9,(t3,t4)0.9);".into(),
    };
    let outlier = NamedOutlierTest { outliers: vec![] };
    let estimator = FixedEstimator;
    let constrained = FixedSearch;
    let collab = Collaborators {
        aligner: &aligner,
        recombination: &recomb,
        tree_search: &search,
        outlier: &outlier,
        likelihood_mapping: None,
        species_tree: &estimator,
        constrained_search: &constrained,
    };

    let err = pipeline::run_filtering(
        four_loci(),
        &collab,
        MoleculeType::Nucleotide,
        1,
        CombinePolicy::Intersection,
        &mut ctx,
    )
    .unwrap_err();

    match err {
        PipelineError::StageExhaustion { stage, examined } => {
            assert_eq!(stage, "recombination");
            assert_eq!(examined, 3);
        }
        other => panic!("expected StageExhaustion, got {:?}", other),
    }
    assert!(!dir.path().join("supermatrix").exists());
    // The ledger retains everything recorded before the failure.
    assert_eq!(ctx.ledger.snapshot().len(), 2);
}

#[test]
fn inconclusive_recombination_result_is_retained_with_warning() {
    let dir = TempDir::new().unwrap();
    let mut ctx = RunContext::new(thresholds(), dir.path().to_path_buf());

    let aligner = PassthroughAligner;
    let recomb = TableRecombTest {
        verdicts: HashMap::from([("clean".to_string(), RecombVerdict::Inconclusive)]),
    };
    let search = FixedTreeSearch {
        newick: "((t1,t2)0.9,(t3,t4)0.9);".into(),
    };
    let outlier = NamedOutlierTest { outliers: vec![] };
    let estimator = FixedEstimator;
    let constrained = FixedSearch;
    let collab = Collaborators {
        aligner: &aligner,
        recombination: &recomb,
        tree_search: &search,
        outlier: &outlier,
        likelihood_mapping: None,
        species_tree: &estimator,
        constrained_search: &constrained,
    };

    let loci = vec![locus(0, "clean", ["ACGT", "ACGA", "ACTT", "AGGT"])];
    let items = pipeline::run_filtering(
        loci,
        &collab,
        MoleculeType::Nucleotide,
        1,
        CombinePolicy::Intersection,
        &mut ctx,
    )
    .unwrap();

    assert_eq!(items.len(), 1);
    let (_, counts) = &ctx.ledger.snapshot()[1];
    assert_eq!(counts.inconclusive, 1);
    assert!(ctx
        .warnings
        .iter()
        .any(|w| w.contains("too few informative sites")));
}

#[test]
fn intersection_policy_excludes_signal_pass_resolution_fail() {
    let dir = TempDir::new().unwrap();
    let mut ctx = RunContext::new(thresholds(), dir.path().to_path_buf());

    let aligner = PassthroughAligner;
    let recomb = TableRecombTest {
        verdicts: HashMap::new(),
    };
    // High support everywhere, so the signal screen passes both loci.
    let search = FixedTreeSearch {
        newick: "((t1,t2)0.95,(t3,t4)0.95);".into(),
    };
    let outlier = NamedOutlierTest { outliers: vec![] };
    let lmap = TableLmap {
        percents: HashMap::from([("outlier".to_string(), 40.0)]),
    };
    let estimator = FixedEstimator;
    let constrained = FixedSearch;
    let collab = Collaborators {
        aligner: &aligner,
        recombination: &recomb,
        tree_search: &search,
        outlier: &outlier,
        likelihood_mapping: Some(&lmap),
        species_tree: &estimator,
        constrained_search: &constrained,
    };

    let loci = vec![
        locus(0, "outlier", ["ACGT", "ACGA", "ACTT", "AGGT"]),
        locus(1, "clean", ["ACGT", "ACGA", "ACTT", "AGGT"]),
    ];
    let items = pipeline::run_filtering(
        loci,
        &collab,
        MoleculeType::Nucleotide,
        1,
        CombinePolicy::Intersection,
        &mut ctx,
    )
    .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].locus.name, "clean");
}

#[test]
fn union_policy_keeps_signal_pass_resolution_fail() {
    let dir = TempDir::new().unwrap();
    let mut ctx = RunContext::new(thresholds(), dir.path().to_path_buf());

    let aligner = PassthroughAligner;
    let recomb = TableRecombTest {
        verdicts: HashMap::new(),
    };
    let search = FixedTreeSearch {
        newick: "((t1,t2)0.95,(t3,t4)0.95);".into(),
    };
    let outlier = NamedOutlierTest { outliers: vec![] };
    let lmap = TableLmap {
        percents: HashMap::from([("lowres".to_string(), 40.0)]),
    };
    let estimator = FixedEstimator;
    let constrained = FixedSearch;
    let collab = Collaborators {
        aligner: &aligner,
        recombination: &recomb,
        tree_search: &search,
        outlier: &outlier,
        likelihood_mapping: Some(&lmap),
        species_tree: &estimator,
        constrained_search: &constrained,
    };

    let loci = vec![locus(0, "lowres", ["ACGT", "ACGA", "ACTT", "AGGT"])];
    let items = pipeline::run_filtering(
        loci,
        &collab,
        MoleculeType::Nucleotide,
        1,
        CombinePolicy::Union,
        &mut ctx,
    )
    .unwrap();
    assert_eq!(items.len(), 1);
}

#[test]
fn unavailable_outlier_collaborator_degrades_to_pass_through() {
    let dir = TempDir::new().unwrap();
    let mut ctx = RunContext::new(thresholds(), dir.path().to_path_buf());

    let aligner = PassthroughAligner;
    let recomb = TableRecombTest {
        verdicts: HashMap::new(),
    };
    let search = FixedTreeSearch {
        newick: "((t1,t2)0.9,(t3,t4)0.9);".into(),
    };
    let outlier = MissingOutlierTest;
    let estimator = FixedEstimator;
    let constrained = FixedSearch;
    let collab = Collaborators {
        aligner: &aligner,
        recombination: &recomb,
        tree_search: &search,
        outlier: &outlier,
        likelihood_mapping: None,
        species_tree: &estimator,
        constrained_search: &constrained,
    };

    let loci = vec![locus(0, "clean", ["ACGT", "ACGA", "ACTT", "AGGT"])];
    let items = pipeline::run_filtering(
        loci,
        &collab,
        MoleculeType::Nucleotide,
        1,
        CombinePolicy::Intersection,
        &mut ctx,
    )
    .unwrap();
    assert_eq!(items.len(), 1);
    assert!(ctx.warnings.iter().any(|w| w.contains("skipped")));
}

#[test]
fn one_failing_estimator_degrades_but_both_is_fatal() {
    let dir = TempDir::new().unwrap();
    let mut ctx = RunContext::new(thresholds(), dir.path().to_path_buf());

    let aligner = PassthroughAligner;
    let recomb = TableRecombTest {
        verdicts: HashMap::new(),
    };
    let search = FixedTreeSearch {
        newick: "((t1,t2)0.9,(t3,t4)0.9);".into(),
    };
    let outlier = NamedOutlierTest { outliers: vec![] };
    let failing = FailingEstimator;
    let constrained = FixedSearch;
    let collab = Collaborators {
        aligner: &aligner,
        recombination: &recomb,
        tree_search: &search,
        outlier: &outlier,
        likelihood_mapping: None,
        species_tree: &failing,
        constrained_search: &constrained,
    };

    let loci = vec![locus(0, "clean", ["ACGT", "ACGA", "ACTT", "AGGT"])];
    let items = pipeline::run_filtering(
        loci,
        &collab,
        MoleculeType::Nucleotide,
        1,
        CombinePolicy::Intersection,
        &mut ctx,
    )
    .unwrap();

    let rooting = Some((RootingMethod::Outgroup, Some("t4")));
    let outputs = pipeline::assemble_and_estimate(
        &items,
        &collab,
        MoleculeType::Nucleotide,
        rooting,
        &mut ctx,
    )
    .unwrap();
    assert!(outputs.coalescent.is_none());
    assert!(outputs.constrained_ml.is_some());
    assert!(ctx
        .warnings
        .iter()
        .any(|w| w.contains("species-tree estimator failed")));
}
