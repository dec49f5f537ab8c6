use crate::cli::PhyloOpts;
use crate::pipeline::{self, Collaborators};
use crate::tools::process::{
    AstralEstimator, IqTreeConstrainedSearch, IqTreeLikelihoodMapping, KdeOutlierTest,
    MafftAligner, PhiTest, ProcessTreeSearch,
};
use crate::tools::{LikelihoodMapping, check_iqtree, check_mafft, check_phi, check_tool};
use crate::types::{RootingMethod, TreeEngine};
use anyhow::Result;

pub fn run(opts: PhyloOpts) -> Result<()> {
    let mut thresholds = super::resolve_thresholds(&opts.shared)?;
    if let Some(v) = opts.min_support {
        thresholds.min_support = v;
    }
    if let Some(v) = opts.min_resolved {
        thresholds.min_resolved = v;
    }
    if let Some(v) = opts.stringency {
        thresholds.stringency = v;
    }
    if opts.rooting == Some(RootingMethod::Outgroup) && opts.outgroup.is_none() {
        anyhow::bail!("--rooting outgroup requires --outgroup <taxon>");
    }

    let engine = opts.shared.engine;
    let engine_bin = match engine {
        TreeEngine::IqTree => "iqtree2",
        TreeEngine::FastTree => "fasttree",
    };
    check_mafft("mafft")?;
    check_phi("Phi")?;
    match engine {
        TreeEngine::IqTree => check_iqtree(engine_bin)?,
        TreeEngine::FastTree => check_tool(
            engine_bin,
            "-help",
            "Install FastTree (http://www.microbesonline.org/fasttree/) and ensure it's in your PATH",
        )?,
    }

    let (mut ctx, workers) = super::setup_context(&opts.shared, thresholds)?;
    let loci = super::ingest_from_dirs(&opts.shared, &mut ctx)?;

    let aligner = MafftAligner {
        bin: "mafft".to_string(),
    };
    let recombination = PhiTest {
        bin: "Phi".to_string(),
    };
    let tree_search = ProcessTreeSearch {
        bin: engine_bin.to_string(),
        engine,
    };
    let outlier = KdeOutlierTest {
        rscript: "Rscript".to_string(),
    };
    let lmap = IqTreeLikelihoodMapping {
        bin: "iqtree2".to_string(),
    };
    let species_tree = AstralEstimator {
        bin: "astral".to_string(),
    };
    let constrained_search = IqTreeConstrainedSearch {
        bin: "iqtree2".to_string(),
    };

    let use_lmap = engine.supports_likelihood_mapping() && !opts.no_likelihood_mapping;
    let collab = Collaborators {
        aligner: &aligner,
        recombination: &recombination,
        tree_search: &tree_search,
        outlier: &outlier,
        likelihood_mapping: if use_lmap {
            Some(&lmap as &dyn LikelihoodMapping)
        } else {
            None
        },
        species_tree: &species_tree,
        constrained_search: &constrained_search,
    };

    let rooting = opts
        .rooting
        .map(|method| (method, opts.outgroup.as_deref()));

    // Flush reports on fatal paths too, so the operator sees the
    // ledger recorded up to the failing stage.
    let outcome: Result<_, crate::error::PipelineError> = (|| {
        let items = pipeline::run_filtering(
            loci,
            &collab,
            opts.shared.molecule,
            workers,
            opts.combine,
            &mut ctx,
        )?;
        println!("{} loci retained as phylogenetic markers", items.len());
        pipeline::assemble_and_estimate(&items, &collab, opts.shared.molecule, rooting, &mut ctx)
    })();

    ctx.flush_reports()?;
    outcome?;
    Ok(())
}
