use super::{FilterStage, Verdict, WorkItem};
use crate::error::PipelineError;
use crate::report::RunContext;

/// Mean branch-support screen. Supports are already normalized to the
/// 0-1 scale by the tree-search adapter, so a single threshold applies
/// regardless of engine.
pub struct SignalScreen;

impl FilterStage for SignalScreen {
    fn name(&self) -> &'static str {
        "phylogenetic_signal"
    }

    fn evaluate(
        &self,
        items: &mut [WorkItem],
        ctx: &mut RunContext,
    ) -> Result<Vec<Verdict>, PipelineError> {
        let min_support = ctx.thresholds.min_support;
        Ok(items
            .iter()
            .map(|item| {
                let tree = match &item.tree {
                    Some(t) => t,
                    None => return Verdict::Fail("no gene tree estimated".to_string()),
                };
                match tree.tree.mean_support() {
                    Some(mean) if mean >= min_support => Verdict::Pass,
                    Some(mean) => Verdict::Fail(format!(
                        "mean support {:.3} below threshold {:.3}",
                        mean, min_support
                    )),
                    None => Verdict::Inconclusive(
                        "tree carries no support annotations".to_string(),
                    ),
                }
            })
            .collect())
    }
}
