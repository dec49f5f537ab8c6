use super::{FilterStage, Verdict, WorkItem};
use crate::dispatcher;
use crate::error::PipelineError;
use crate::report::RunContext;
use crate::tools::Aligner;
use crate::types::MoleculeType;
use crate::utils::progress::ProgressBarBuilder;
use std::fs;
use std::path::PathBuf;

/// Drops loci with empty or incomplete sequence pairs, then aligns the
/// remainder. An alignment whose taxon set drifts from the locus's is
/// treated as a structural failure of that locus.
pub struct StructuralScreen<'a> {
    pub aligner: &'a dyn Aligner,
    pub molecule: MoleculeType,
    pub workers: usize,
}

impl FilterStage for StructuralScreen<'_> {
    fn name(&self) -> &'static str {
        "structural"
    }

    fn evaluate(
        &self,
        items: &mut [WorkItem],
        ctx: &mut RunContext,
    ) -> Result<Vec<Verdict>, PipelineError> {
        let min_taxa = ctx.thresholds.min_taxa;
        let stage_dir = ctx.stage_dir(self.name())?;

        let mut verdicts: Vec<Verdict> = items
            .iter()
            .map(|item| {
                let n = item.locus.nuc.len();
                if n < min_taxa {
                    Verdict::Fail(format!("{} taxa, need at least {}", n, min_taxa))
                } else if item.locus.nuc.iter().any(|r| r.seq.is_empty())
                    || item.locus.prot.iter().any(|r| r.seq.is_empty())
                {
                    Verdict::Fail("empty sequence record".to_string())
                } else {
                    Verdict::Pass
                }
            })
            .collect();

        // Per-locus workdirs so concurrent aligner jobs never share a
        // path.
        let candidates: Vec<(usize, PathBuf)> = verdicts
            .iter()
            .enumerate()
            .filter(|(_, v)| **v == Verdict::Pass)
            .map(|(i, _)| {
                let dir = stage_dir.join(&items[i].locus.name);
                fs::create_dir_all(&dir).map(|_| (i, dir))
            })
            .collect::<Result<_, _>>()?;

        let progress = ProgressBarBuilder::new("Aligning loci")
            .with_progress_bar()
            .build()
            .ok();
        if let Some(pb) = &progress {
            pb.set_length(candidates.len() as u64);
        }

        let jobs: Vec<(&WorkItem, &PathBuf)> = candidates
            .iter()
            .map(|(i, dir)| (&items[*i], dir))
            .collect();
        let results = dispatcher::dispatch(&jobs, self.workers, |(item, dir)| {
            let aligned = self.aligner.align(&item.locus, self.molecule, dir);
            if let Some(pb) = &progress {
                pb.inc(1);
            }
            aligned
        });
        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        for ((i, _), result) in candidates.iter().zip(results) {
            match result {
                Ok(alignment) => items[*i].alignment = Some(alignment),
                Err(failure) => verdicts[*i] = Verdict::Fail(failure.message),
            }
        }
        Ok(verdicts)
    }
}
