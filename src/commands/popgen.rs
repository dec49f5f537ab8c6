use crate::cli::PopgenOpts;
use crate::popgen;
use crate::stages::{
    self, recombination::RecombinationScreen, structural::StructuralScreen,
    trivial::TrivialTreeScreen,
};
use crate::tools::process::{MafftAligner, PhiTest, ProcessTreeSearch};
use crate::tools::{check_iqtree, check_mafft, check_phi, check_tool};
use crate::types::TreeEngine;
use anyhow::Result;

/// Population-genetics mode: the same ingestion and initial filters as
/// the phylogenetics mode, then per-locus descriptive and neutrality
/// statistics instead of species-tree construction.
pub fn run(opts: PopgenOpts) -> Result<()> {
    let thresholds = super::resolve_thresholds(&opts.shared)?;

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

    let outcome: Result<(), crate::error::PipelineError> = (|| {
        let items: Vec<_> = loci.into_iter().map(stages::WorkItem::new).collect();
        let items = stages::apply(
            &StructuralScreen {
                aligner: &aligner,
                molecule: opts.shared.molecule,
                workers,
            },
            items,
            &mut ctx,
        )?;
        let items = stages::apply(
            &RecombinationScreen {
                test: &recombination,
                workers,
            },
            items,
            &mut ctx,
        )?;
        // Gene trees feed the consistency/homoplasy indices.
        let items = stages::apply(
            &TrivialTreeScreen {
                search: &tree_search,
                workers,
            },
            items,
            &mut ctx,
        )?;

        let rows: Vec<_> = items
            .iter()
            .filter_map(|item| {
                item.alignment.as_ref().map(|aln| {
                    popgen::summarize(
                        aln,
                        item.tree.as_ref().map(|t| &t.tree),
                        opts.shared.molecule,
                    )
                })
            })
            .collect();
        let table_path = ctx.workdir.join("popgen_summary.tsv");
        popgen::write_table(&rows, &table_path)
            .map_err(|e| crate::error::PipelineError::Parse(format!("{:#}", e)))?;
        ctx.register_artifact("popgen_summary", &table_path);
        println!(
            "population-genetics summary for {} loci written to {}",
            rows.len(),
            table_path.display()
        );
        Ok(())
    })();

    ctx.flush_reports()?;
    outcome.map_err(anyhow::Error::from)
}
