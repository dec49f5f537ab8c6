use crate::config::Thresholds;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Per-stage verdict tallies.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct StageCounts {
    pub examined: usize,
    pub passed: usize,
    pub failed: usize,
    pub inconclusive: usize,
}

impl StageCounts {
    /// Loci continuing to the next stage. Inconclusive loci are
    /// retained by policy, so they count as survivors.
    pub fn survivors(&self) -> usize {
        self.passed + self.inconclusive
    }
}

/// Append-only record of what every filter stage did, in execution
/// order. Prior entries are never rewritten.
#[derive(Debug, Default, Clone)]
pub struct FilteringLedger {
    entries: Vec<(String, StageCounts)>,
}

impl FilteringLedger {
    pub fn record(&mut self, stage: &str, counts: StageCounts) {
        self.entries.push((stage.to_string(), counts));
    }

    pub fn snapshot(&self) -> &[(String, StageCounts)] {
        &self.entries
    }

    pub fn last_survivors(&self) -> Option<usize> {
        self.entries.last().map(|(_, c)| c.survivors())
    }

    /// The surviving series must never grow between stages.
    pub fn is_monotonic(&self) -> bool {
        self.entries
            .windows(2)
            .all(|w| w[1].1.survivors() <= w[0].1.survivors())
    }

    pub fn overview_table(&self) -> String {
        let mut out = String::from("stage\texamined\tpassed\tfailed\tinconclusive\tsurviving\n");
        for (stage, c) in &self.entries {
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}\t{}\n",
                stage,
                c.examined,
                c.passed,
                c.failed,
                c.inconclusive,
                c.survivors()
            ));
        }
        out
    }
}

#[derive(Debug, Serialize)]
struct ManifestFile {
    generated_at: String,
    entries: BTreeMap<String, PathBuf>,
}

/// Mutable run-wide state threaded through the pipeline instead of
/// living in process globals, so each stage can be tested in
/// isolation.
#[derive(Debug)]
pub struct RunContext {
    pub thresholds: Thresholds,
    pub workdir: PathBuf,
    pub ledger: FilteringLedger,
    pub warnings: Vec<String>,
    artifacts: BTreeMap<String, PathBuf>,
    figures: BTreeMap<String, PathBuf>,
}

impl RunContext {
    pub fn new(thresholds: Thresholds, workdir: PathBuf) -> Self {
        RunContext {
            thresholds,
            workdir,
            ledger: FilteringLedger::default(),
            warnings: Vec::new(),
            artifacts: BTreeMap::new(),
            figures: BTreeMap::new(),
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        eprintln!("warning: {}", message);
        self.warnings.push(message);
    }

    pub fn register_artifact(&mut self, logical_name: &str, path: &Path) {
        self.artifacts.insert(logical_name.to_string(), path.to_path_buf());
    }

    /// Sweep a collaborator's working directory for the plot files it
    /// left behind and record them in the figure manifest.
    pub fn register_figures_in(&mut self, logical_prefix: &str, dir: &Path) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if matches!(ext, "eps" | "svg" | "pdf" | "png") {
                let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("figure");
                self.figures
                    .insert(format!("{}_{}", logical_prefix, stem), path);
            }
        }
        Ok(())
    }

    pub fn stage_dir(&self, stage: &str) -> std::io::Result<PathBuf> {
        let dir = self.workdir.join(stage);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn write_manifest(
        &self,
        name: &str,
        entries: &BTreeMap<String, PathBuf>,
    ) -> anyhow::Result<PathBuf> {
        let path = self.workdir.join(name);
        let manifest = ManifestFile {
            generated_at: Utc::now().to_rfc3339(),
            entries: entries.clone(),
        };
        let file = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(file, &manifest)?;
        Ok(path)
    }

    /// Flush the overview table, manifests, and warning recap. Called
    /// both at normal completion and on the fatal paths, so operators
    /// always see the ledger as recorded so far.
    pub fn flush_reports(&mut self) -> anyhow::Result<()> {
        let overview = self.workdir.join("filtering_overview.tsv");
        let mut file = BufWriter::new(File::create(&overview)?);
        file.write_all(self.ledger.overview_table().as_bytes())?;
        file.flush()?;
        self.artifacts
            .insert("filtering_overview".to_string(), overview);

        self.write_manifest("output_manifest.json", &self.artifacts)?;
        self.write_manifest("figure_manifest.json", &self.figures)?;

        println!("\n{}", self.ledger.overview_table());
        if self.warnings.is_empty() {
            println!("run completed with no degradations");
        } else {
            println!("degradations recorded during this run:");
            for w in &self.warnings {
                println!("  - {}", w);
            }
        }
        Ok(())
    }
}
