use super::{FilterStage, Verdict, WorkItem};
use crate::error::PipelineError;
use crate::report::RunContext;
use crate::tools::{OutlierCall, OutlierOutcome, OutlierTest};

/// Pools all surviving gene trees and removes topological outliers by
/// the kernel-density collaborator. An unavailable collaborator
/// degrades the stage to a pass-through with a recorded warning; the
/// run never fails for that reason alone.
pub struct OutlierScreen<'a> {
    pub test: &'a dyn OutlierTest,
}

impl FilterStage for OutlierScreen<'_> {
    fn name(&self) -> &'static str {
        "topological_outlier"
    }

    fn evaluate(
        &self,
        items: &mut [WorkItem],
        ctx: &mut RunContext,
    ) -> Result<Vec<Verdict>, PipelineError> {
        let stage_dir = ctx.stage_dir(self.name())?;
        let trees: Vec<_> = items
            .iter()
            .filter_map(|item| item.tree.as_ref().cloned())
            .collect();

        let outcome = self
            .test
            .detect(&trees, ctx.thresholds.stringency, &stage_dir)
            .map_err(|e| PipelineError::Parse(format!("{:#}", e)))?;

        match outcome {
            OutlierOutcome::Unavailable(detail) => {
                ctx.warn(format!(
                    "topological-outlier screen skipped (collaborator unavailable: {}); \
                     all loci passed through unfiltered",
                    detail
                ));
                ctx.register_artifact("outlier_screen_skipped", &stage_dir);
                Ok(vec![Verdict::Pass; items.len()])
            }
            OutlierOutcome::Calls(calls) => {
                // kdetrees leaves its density plot next to the calls.
                ctx.register_figures_in("outlier_screen", &stage_dir)?;
                Ok(items
                    .iter()
                    .map(|item| match calls.get(&item.locus.id) {
                        Some(OutlierCall::Outlier) => {
                            Verdict::Fail("topological outlier".to_string())
                        }
                        Some(OutlierCall::Ok) => Verdict::Pass,
                        // A tree the collaborator did not score cannot
                        // be condemned.
                        None => Verdict::Pass,
                    })
                    .collect())
            }
        }
    }
}
