pub mod outlier;
pub mod recombination;
pub mod resolution;
pub mod signal;
pub mod structural;
pub mod trivial;

use crate::error::PipelineError;
use crate::report::{RunContext, StageCounts};
use crate::repository::{Alignment, Locus};
use crate::tree::GeneTree;
use std::fs;

/// One locus moving through the pipeline, accumulating derived
/// artifacts as stages produce them.
#[derive(Debug)]
pub struct WorkItem {
    pub locus: Locus,
    pub alignment: Option<Alignment>,
    pub tree: Option<GeneTree>,
    pub resolved_pct: Option<f64>,
}

impl WorkItem {
    pub fn new(locus: Locus) -> Self {
        WorkItem {
            locus,
            alignment: None,
            tree: None,
            resolved_pct: None,
        }
    }
}

/// Stage verdict for one locus. Inconclusive loci are retained but
/// flagged; failure is terminal for the locus.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Pass,
    Fail(String),
    Inconclusive(String),
}

/// A named, ordered predicate over the working set. Stages may enrich
/// items (attach alignments, trees) as a side effect of evaluation.
pub trait FilterStage {
    fn name(&self) -> &'static str;

    fn evaluate(
        &self,
        items: &mut [WorkItem],
        ctx: &mut RunContext,
    ) -> Result<Vec<Verdict>, PipelineError>;
}

/// Partition the working set by the given verdicts, record counts in
/// the ledger, quarantine the rejects, and enforce the zero-survivor
/// fatal condition.
pub fn apply_verdicts(
    name: &str,
    items: Vec<WorkItem>,
    verdicts: Vec<Verdict>,
    ctx: &mut RunContext,
) -> Result<Vec<WorkItem>, PipelineError> {
    debug_assert_eq!(items.len(), verdicts.len());
    let mut counts = StageCounts {
        examined: items.len(),
        ..StageCounts::default()
    };
    let mut survivors = Vec::with_capacity(items.len());
    let mut rejects = Vec::new();

    for (item, verdict) in items.into_iter().zip(verdicts) {
        match verdict {
            Verdict::Pass => {
                counts.passed += 1;
                survivors.push(item);
            }
            Verdict::Inconclusive(note) => {
                counts.inconclusive += 1;
                ctx.warn(format!(
                    "{}: locus '{}' inconclusive ({}); retained",
                    name, item.locus.name, note
                ));
                survivors.push(item);
            }
            Verdict::Fail(reason) => {
                counts.failed += 1;
                rejects.push(format!("{}\t{}", item.locus.name, reason));
            }
        }
    }

    if !rejects.is_empty() {
        let dir = ctx.stage_dir(name)?;
        let quarantine = dir.join("filtered_out.tsv");
        fs::write(&quarantine, rejects.join("\n") + "\n")?;
        ctx.register_artifact(&format!("{}_quarantine", name), &quarantine);
    }

    ctx.ledger.record(name, counts);

    if survivors.is_empty() {
        return Err(PipelineError::StageExhaustion {
            stage: name.to_string(),
            examined: counts.examined,
        });
    }
    if survivors.len() < ctx.thresholds.min_survivors_warn {
        ctx.warn(format!(
            "{}: only {} loci remain (soft minimum {})",
            name,
            survivors.len(),
            ctx.thresholds.min_survivors_warn
        ));
    }
    Ok(survivors)
}

/// Run one stage to completion: evaluate, then partition and record.
pub fn apply(
    stage: &dyn FilterStage,
    mut items: Vec<WorkItem>,
    ctx: &mut RunContext,
) -> Result<Vec<WorkItem>, PipelineError> {
    let verdicts = stage.evaluate(&mut items, ctx)?;
    apply_verdicts(stage.name(), items, verdicts, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Thresholds;
    use crate::repository::SeqRecord;
    use tempfile::TempDir;

    fn locus(id: u32, name: &str) -> Locus {
        Locus {
            id,
            name: name.to_string(),
            nuc: vec![SeqRecord {
                taxon: "t1".into(),
                seq: "ACGT".into(),
            }],
            prot: vec![SeqRecord {
                taxon: "t1".into(),
                seq: "MK".into(),
            }],
            source: std::path::PathBuf::from(name),
        }
    }

    fn context(dir: &TempDir) -> RunContext {
        let mut thresholds = Thresholds::default();
        thresholds.min_survivors_warn = 0;
        RunContext::new(thresholds, dir.path().to_path_buf())
    }

    #[test]
    fn verdicts_partition_and_record() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        let items = vec![
            WorkItem::new(locus(0, "a")),
            WorkItem::new(locus(1, "b")),
            WorkItem::new(locus(2, "c")),
        ];
        let verdicts = vec![
            Verdict::Pass,
            Verdict::Fail("bad".into()),
            Verdict::Inconclusive("unclear".into()),
        ];
        let survivors = apply_verdicts("demo", items, verdicts, &mut ctx).unwrap();
        assert_eq!(survivors.len(), 2);
        let (_, counts) = &ctx.ledger.snapshot()[0];
        assert_eq!(counts.examined, 3);
        assert_eq!(counts.passed, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.inconclusive, 1);
        // Quarantine file lists the reject with its reason.
        let quarantine =
            std::fs::read_to_string(dir.path().join("demo").join("filtered_out.tsv")).unwrap();
        assert!(quarantine.contains("b\tbad"));
    }

    #[test]
    fn zero_survivors_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        let items = vec![WorkItem::new(locus(0, "a"))];
        let err = apply_verdicts("demo", items, vec![Verdict::Fail("bad".into())], &mut ctx)
            .unwrap_err();
        assert!(matches!(err, PipelineError::StageExhaustion { .. }));
        // The ledger keeps the counts recorded before the failure.
        assert_eq!(ctx.ledger.snapshot().len(), 1);
    }
}
