use super::{FilterStage, Verdict, WorkItem};
use crate::dispatcher;
use crate::error::PipelineError;
use crate::report::RunContext;
use crate::tools::LikelihoodMapping;
use crate::utils::progress::ProgressBarBuilder;
use std::fs;
use std::path::PathBuf;

/// Likelihood-mapping screen: percentage of fully resolved quartets
/// must reach the configured floor. Only engines that expose
/// likelihood mapping activate this stage.
pub struct ResolutionScreen<'a> {
    pub mapping: &'a dyn LikelihoodMapping,
    pub workers: usize,
}

impl FilterStage for ResolutionScreen<'_> {
    fn name(&self) -> &'static str {
        "likelihood_resolution"
    }

    fn evaluate(
        &self,
        items: &mut [WorkItem],
        ctx: &mut RunContext,
    ) -> Result<Vec<Verdict>, PipelineError> {
        let min_resolved = ctx.thresholds.min_resolved;
        let stage_dir = ctx.stage_dir(self.name())?;

        let dirs: Vec<PathBuf> = items
            .iter()
            .map(|item| {
                let dir = stage_dir.join(&item.locus.name);
                fs::create_dir_all(&dir).map(|_| dir)
            })
            .collect::<Result<_, _>>()?;

        let progress = ProgressBarBuilder::new("Likelihood mapping")
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
            let pct = self.mapping.percent_resolved(alignment, dir);
            if let Some(pb) = &progress {
                pb.inc(1);
            }
            pct
        });
        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        let mut verdicts = Vec::with_capacity(items.len());
        for ((result, item), dir) in results.into_iter().zip(items.iter_mut()).zip(&dirs) {
            match result {
                Ok(pct) => {
                    item.resolved_pct = Some(pct);
                    // The mapping run leaves its quartet plot in the
                    // per-locus directory.
                    ctx.register_figures_in("likelihood_mapping", dir)?;
                    verdicts.push(if pct >= min_resolved {
                        Verdict::Pass
                    } else {
                        Verdict::Fail(format!(
                            "{:.1}% resolved quartets, need {:.1}%",
                            pct, min_resolved
                        ))
                    });
                }
                Err(failure) => verdicts.push(Verdict::Fail(failure.message)),
            }
        }
        Ok(verdicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Thresholds;
    use crate::repository::{Alignment, Locus, SeqRecord};
    use std::path::Path;
    use tempfile::TempDir;

    struct PlottingLmap;

    impl LikelihoodMapping for PlottingLmap {
        fn percent_resolved(&self, _alignment: &Alignment, workdir: &Path) -> anyhow::Result<f64> {
            fs::write(workdir.join("quartets.lmap.svg"), "<svg/>")?;
            Ok(92.0)
        }
    }

    fn item(id: u32, name: &str) -> WorkItem {
        let records = vec![SeqRecord {
            taxon: "t1".into(),
            seq: "ACGT".into(),
        }];
        let mut item = WorkItem::new(Locus {
            id,
            name: name.to_string(),
            nuc: records.clone(),
            prot: records.clone(),
            source: name.into(),
        });
        item.alignment = Some(Alignment {
            locus_id: id,
            locus_name: name.to_string(),
            taxa: vec!["t1".into()],
            rows: vec!["ACGT".into()],
        });
        item
    }

    #[test]
    fn mapping_plots_are_registered_as_figures() {
        let dir = TempDir::new().unwrap();
        let mut thresholds = Thresholds::default();
        thresholds.min_survivors_warn = 0;
        let mut ctx = RunContext::new(thresholds, dir.path().to_path_buf());

        let mut items = vec![item(0, "locus_a")];
        let screen = ResolutionScreen {
            mapping: &PlottingLmap,
            workers: 1,
        };
        let verdicts = screen.evaluate(&mut items, &mut ctx).unwrap();
        assert_eq!(verdicts, vec![Verdict::Pass]);

        ctx.flush_reports().unwrap();
        let manifest =
            fs::read_to_string(dir.path().join("figure_manifest.json")).unwrap();
        assert!(manifest.contains("likelihood_mapping_quartets.lmap"));
    }
}
