use super::{FilterStage, Verdict, WorkItem};
use crate::dispatcher;
use crate::error::PipelineError;
use crate::report::RunContext;
use crate::tools::TreeSearch;
use crate::utils::progress::ProgressBarBuilder;
use std::fs;
use std::path::PathBuf;

/// Estimates a gene tree per surviving alignment and drops trees too
/// small to carry topological signal.
pub struct TrivialTreeScreen<'a> {
    pub search: &'a dyn TreeSearch,
    pub workers: usize,
}

impl FilterStage for TrivialTreeScreen<'_> {
    fn name(&self) -> &'static str {
        "trivial_tree"
    }

    fn evaluate(
        &self,
        items: &mut [WorkItem],
        ctx: &mut RunContext,
    ) -> Result<Vec<Verdict>, PipelineError> {
        let min_leaves = ctx.thresholds.min_leaves;
        let stage_dir = ctx.stage_dir(self.name())?;

        let dirs: Vec<PathBuf> = items
            .iter()
            .map(|item| {
                let dir = stage_dir.join(&item.locus.name);
                fs::create_dir_all(&dir).map(|_| dir)
            })
            .collect::<Result<_, _>>()?;

        let progress = ProgressBarBuilder::new("Estimating gene trees")
            .with_progress_bar()
            .build()
            .ok();
        if let Some(pb) = &progress {
            pb.set_length(items.len() as u64);
        }

        let jobs: Vec<(&WorkItem, &PathBuf)> = items.iter().zip(&dirs).collect();
        let results = dispatcher::dispatch(&jobs, self.workers, |(item, dir)| {
            let alignment = item
                .alignment
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("no alignment for '{}'", item.locus.name))?;
            let tree = self.search.search(alignment, dir);
            if let Some(pb) = &progress {
                pb.inc(1);
            }
            tree
        });
        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        let verdicts = results
            .into_iter()
            .zip(items.iter_mut())
            .map(|(result, item)| match result {
                Ok(tree) => {
                    let leaves = tree.tree.n_leaves();
                    if leaves < min_leaves {
                        Verdict::Fail(format!("{} leaves, need at least {}", leaves, min_leaves))
                    } else {
                        item.tree = Some(tree);
                        Verdict::Pass
                    }
                }
                Err(failure) => Verdict::Fail(failure.message),
            })
            .collect();
        Ok(verdicts)
    }
}
