pub mod phylo;
pub mod popgen;

use crate::cli::SharedOpts;
use crate::config::Thresholds;
use crate::dispatcher;
use crate::error::PipelineError;
use crate::report::RunContext;
use crate::repository::{self, Locus};
use std::path::{Path, PathBuf};

/// Merge on-disk config with CLI overrides and validate hard limits.
pub(crate) fn resolve_thresholds(shared: &SharedOpts) -> Result<Thresholds, PipelineError> {
    let mut thresholds = Thresholds::load();
    if let Some(alpha) = shared.alpha {
        thresholds.alpha = alpha;
    }
    if shared.threads.is_some() {
        thresholds.max_workers = shared.threads;
    }
    if shared.min_taxa < 4 {
        return Err(PipelineError::Structural(format!(
            "minimum taxon count is 4, got {}",
            shared.min_taxa
        )));
    }
    thresholds.min_taxa = shared.min_taxa;
    Ok(thresholds)
}

pub(crate) fn ingest_from_dirs(
    shared: &SharedOpts,
    ctx: &mut RunContext,
) -> Result<Vec<Locus>, PipelineError> {
    let nuc_files = repository::list_fasta_files(Path::new(&shared.nuc_dir), "fna")?;
    let prot_files = repository::list_fasta_files(Path::new(&shared.prot_dir), "faa")?;
    let (loci, normalization) = repository::ingest(&nuc_files, &prot_files)?;
    println!("ingested {} loci", loci.len());
    if !normalization.is_clean() {
        ctx.warn(format!(
            "input sanitized in place: {} duplicate labels suffixed, {} illegal residues masked",
            normalization.relabeled_duplicates, normalization.masked_residues
        ));
    }
    Ok(loci)
}

pub(crate) fn setup_context(
    shared: &SharedOpts,
    thresholds: Thresholds,
) -> Result<(RunContext, usize), PipelineError> {
    let workdir = PathBuf::from(&shared.output_dir);
    std::fs::create_dir_all(&workdir)?;
    let workers = dispatcher::effective_workers(thresholds.max_workers);
    Ok((RunContext::new(thresholds, workdir), workers))
}
