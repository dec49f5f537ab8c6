use super::{FilterStage, Verdict, WorkItem};
use crate::dispatcher;
use crate::error::PipelineError;
use crate::report::RunContext;
use crate::tools::{RecombVerdict, RecombinationTest};
use crate::utils::progress::ProgressBarBuilder;
use std::fs;
use std::path::PathBuf;

/// Permutation-based recombination screen. A locus passes when both
/// the normal and permutation p-values exceed alpha. Alignments with
/// too few informative sites cannot be tested; policy is to retain
/// them with dummy non-significant p-values and flag them loudly.
pub struct RecombinationScreen<'a> {
    pub test: &'a dyn RecombinationTest,
    pub workers: usize,
}

impl FilterStage for RecombinationScreen<'_> {
    fn name(&self) -> &'static str {
        "recombination"
    }

    fn evaluate(
        &self,
        items: &mut [WorkItem],
        ctx: &mut RunContext,
    ) -> Result<Vec<Verdict>, PipelineError> {
        let alpha = ctx.thresholds.alpha;
        let stage_dir = ctx.stage_dir(self.name())?;

        let dirs: Vec<PathBuf> = items
            .iter()
            .map(|item| {
                let dir = stage_dir.join(&item.locus.name);
                fs::create_dir_all(&dir).map(|_| dir)
            })
            .collect::<Result<_, _>>()?;

        let progress = ProgressBarBuilder::new("Screening for recombination")
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
            let verdict = self.test.test(alignment, dir);
            if let Some(pb) = &progress {
                pb.inc(1);
            }
            verdict
        });
        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        let mut table = String::from("locus\tp_normal\tp_permutation\tnote\n");
        let verdicts = items
            .iter()
            .zip(results)
            .map(|(item, result)| match result {
                Ok(RecombVerdict::PValues {
                    normal,
                    permutation,
                }) => {
                    table.push_str(&format!(
                        "{}\t{:.4}\t{:.4}\t\n",
                        item.locus.name, normal, permutation
                    ));
                    if normal > alpha && permutation > alpha {
                        Verdict::Pass
                    } else {
                        Verdict::Fail(format!(
                            "recombination signal (p_normal={:.4}, p_permutation={:.4}, alpha={})",
                            normal, permutation, alpha
                        ))
                    }
                }
                Ok(RecombVerdict::Inconclusive) => {
                    // Deliberate leniency: untestable loci pass with
                    // dummy p-values, visibly.
                    table.push_str(&format!(
                        "{}\t1.0000\t1.0000\ttoo_few_informative_sites\n",
                        item.locus.name
                    ));
                    Verdict::Inconclusive(
                        "too few informative sites; assigned dummy p=1.0".to_string(),
                    )
                }
                Err(failure) => Verdict::Fail(failure.message),
            })
            .collect();

        let table_path = stage_dir.join("recombination_pvalues.tsv");
        fs::write(&table_path, table)?;
        ctx.register_artifact("recombination_pvalues", &table_path);

        Ok(verdicts)
    }
}
