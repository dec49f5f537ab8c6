//! `std::process::Command`-backed collaborator implementations. Each
//! call is an independent out-of-process job writing only under the
//! per-locus directory it is handed, so concurrent jobs never collide.

use super::{
    Aligner, ConstrainedSearch, LikelihoodMapping, OutlierOutcome, OutlierTest, RecombVerdict,
    RecombinationTest, SpeciesTreeEstimator, TreeSearch, decode,
};
use crate::repository::{Alignment, Locus, SeqRecord};
use crate::supermatrix::Supermatrix;
use crate::tree::{GeneTree, Tree};
use crate::types::{MoleculeType, TreeEngine};
use anyhow::{Context, Result, bail};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::process::Command;

fn write_fasta(path: &Path, records: &[SeqRecord]) -> Result<()> {
    let mut text = String::new();
    for rec in records {
        text.push_str(&format!(">{}\n{}\n", rec.taxon, rec.seq));
    }
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn write_alignment_fasta(path: &Path, alignment: &Alignment) -> Result<()> {
    let records: Vec<SeqRecord> = alignment
        .taxa
        .iter()
        .zip(&alignment.rows)
        .map(|(taxon, row)| SeqRecord {
            taxon: taxon.clone(),
            seq: row.clone(),
        })
        .collect();
    write_fasta(path, &records)
}

fn read_aligned_fasta(path: &Path, locus: &Locus) -> Result<Alignment> {
    let reader = bio::io::fasta::Reader::from_file(path)
        .with_context(|| format!("reading aligner output {}", path.display()))?;
    let mut taxa = Vec::new();
    let mut rows = Vec::new();
    for result in reader.records() {
        let rec = result.context("malformed aligner output record")?;
        taxa.push(rec.id().to_string());
        rows.push(String::from_utf8_lossy(rec.seq()).into_owned());
    }
    let aligned: BTreeSet<&str> = taxa.iter().map(|t| t.as_str()).collect();
    if aligned != locus.taxa() {
        bail!(
            "aligner changed the taxon set of locus '{}'; alignment discarded",
            locus.name
        );
    }
    let width = rows.first().map(|r| r.len()).unwrap_or(0);
    if rows.iter().any(|r| r.len() != width) {
        bail!("aligner produced rows of unequal length for '{}'", locus.name);
    }
    Ok(Alignment {
        locus_id: locus.id,
        locus_name: locus.name.clone(),
        taxa,
        rows,
    })
}

fn run_captured(cmd: &mut Command, what: &str) -> Result<String> {
    let output = cmd
        .output()
        .with_context(|| format!("failed to launch {}", what))?;
    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            what,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub struct MafftAligner {
    pub bin: String,
}

impl Aligner for MafftAligner {
    fn align(&self, locus: &Locus, molecule: MoleculeType, workdir: &Path) -> Result<Alignment> {
        let input = workdir.join(format!("{}.fasta", locus.name));
        write_fasta(&input, locus.records(molecule))?;
        let stdout = run_captured(
            Command::new(&self.bin).arg("--auto").arg("--quiet").arg(&input),
            "mafft",
        )?;
        let aligned = workdir.join(format!("{}.aln", locus.name));
        fs::write(&aligned, stdout)?;
        read_aligned_fasta(&aligned, locus)
    }
}

pub struct PhiTest {
    pub bin: String,
}

impl RecombinationTest for PhiTest {
    fn test(&self, alignment: &Alignment, workdir: &Path) -> Result<RecombVerdict> {
        let input = workdir.join(format!("{}.phi.fasta", alignment.locus_name));
        write_alignment_fasta(&input, alignment)?;
        // Phi exits non-zero on too-few-sites; keep its stdout either way.
        let output = Command::new(&self.bin)
            .arg("-f")
            .arg(&input)
            .arg("-p")
            .current_dir(workdir)
            .output()
            .context("failed to launch Phi")?;
        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        Ok(decode::phi_output(&text)?)
    }
}

pub struct ProcessTreeSearch {
    pub bin: String,
    pub engine: TreeEngine,
}

impl TreeSearch for ProcessTreeSearch {
    fn search(&self, alignment: &Alignment, workdir: &Path) -> Result<GeneTree> {
        let input = workdir.join(format!("{}.aln", alignment.locus_name));
        write_alignment_fasta(&input, alignment)?;
        let (newick, model) = match self.engine {
            TreeEngine::IqTree => {
                run_captured(
                    Command::new(&self.bin)
                        .arg("-s")
                        .arg(&input)
                        .args(["-m", "MFP", "--ufboot", "1000", "--quiet", "-redo"]),
                    "iqtree",
                )?;
                let treefile = workdir.join(format!("{}.aln.treefile", alignment.locus_name));
                let report = workdir.join(format!("{}.aln.iqtree", alignment.locus_name));
                let newick = fs::read_to_string(&treefile)
                    .with_context(|| format!("reading {}", treefile.display()))?;
                let model = fs::read_to_string(&report)
                    .ok()
                    .and_then(|t| decode::best_fit_model(&t))
                    .unwrap_or_else(|| "unknown".to_string());
                (newick, model)
            }
            TreeEngine::FastTree => {
                let newick = run_captured(
                    Command::new(&self.bin).args(["-quiet", "-nt", "-gtr"]).arg(&input),
                    "fasttree",
                )?;
                (newick, "GTR".to_string())
            }
        };
        let mut tree = Tree::parse_newick(newick.trim())?;
        tree.normalize_supports(self.engine.support_divisor());
        Ok(GeneTree {
            locus_id: alignment.locus_id,
            locus_name: alignment.locus_name.clone(),
            tree,
            model,
        })
    }
}

/// kdetrees via Rscript. Treated as optional: a missing interpreter or
/// package reports `Unavailable` so the owning stage can degrade to a
/// pass-through.
pub struct KdeOutlierTest {
    pub rscript: String,
}

impl OutlierTest for KdeOutlierTest {
    fn detect(
        &self,
        trees: &[GeneTree],
        stringency: f64,
        workdir: &Path,
    ) -> Result<OutlierOutcome> {
        let input = workdir.join("gene_trees.nwk");
        let mut text = String::new();
        for t in trees {
            text.push_str(&t.tree.to_newick());
            text.push('\n');
        }
        fs::write(&input, text)?;
        let table = workdir.join("outlier_calls.tsv");
        let density = workdir.join("kde_density.pdf");
        // The trees go over as bare Newick, so the table is keyed by
        // the 1-based row index, never by name.
        let script = format!(
            "suppressMessages(library(kdetrees)); library(ape); \
             trees <- read.tree('{}'); \
             res <- kdetrees(trees, k={}); \
             calls <- ifelse(seq_along(trees) %in% res$i, 'outlier', 'ok'); \
             pdf('{}'); print(plot(res)); invisible(dev.off()); \
             write.table(data.frame(seq_along(trees), calls), '{}', sep='\\t', \
             quote=FALSE, row.names=FALSE, col.names=FALSE)",
            input.display(),
            stringency,
            density.display(),
            table.display()
        );
        let launched = Command::new(&self.rscript).arg("-e").arg(&script).output();
        let output = match launched {
            Ok(o) => o,
            Err(e) => return Ok(OutlierOutcome::Unavailable(format!("Rscript: {}", e))),
        };
        if !output.status.success() {
            return Ok(OutlierOutcome::Unavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let text = fs::read_to_string(&table)?;
        let by_index = decode::outlier_table(&text)?;
        Ok(OutlierOutcome::Calls(join_outlier_calls(trees, &by_index)))
    }
}

/// Map positional calls back onto the loci that produced the trees.
fn join_outlier_calls(
    trees: &[GeneTree],
    by_index: &HashMap<usize, super::OutlierCall>,
) -> HashMap<u32, super::OutlierCall> {
    trees
        .iter()
        .enumerate()
        .filter_map(|(i, t)| by_index.get(&(i + 1)).map(|call| (t.locus_id, *call)))
        .collect()
}

pub struct IqTreeLikelihoodMapping {
    pub bin: String,
}

impl LikelihoodMapping for IqTreeLikelihoodMapping {
    fn percent_resolved(&self, alignment: &Alignment, workdir: &Path) -> Result<f64> {
        let input = workdir.join(format!("{}.lmap.aln", alignment.locus_name));
        write_alignment_fasta(&input, alignment)?;
        run_captured(
            Command::new(&self.bin)
                .arg("-s")
                .arg(&input)
                .args(["-lmap", "2000", "-n", "0", "--quiet", "-redo"]),
            "iqtree likelihood mapping",
        )?;
        let report = workdir.join(format!("{}.lmap.aln.iqtree", alignment.locus_name));
        let text = fs::read_to_string(&report)
            .with_context(|| format!("reading {}", report.display()))?;
        Ok(decode::likelihood_mapping_percent(&text)?)
    }
}

pub struct AstralEstimator {
    pub bin: String,
}

impl SpeciesTreeEstimator for AstralEstimator {
    fn estimate(&self, trees: &[GeneTree], workdir: &Path) -> Result<String> {
        let input = workdir.join("astral_input.nwk");
        let mut text = String::new();
        for t in trees {
            text.push_str(&t.tree.to_newick());
            text.push('\n');
        }
        fs::write(&input, text)?;
        let out = workdir.join("astral_species.nwk");
        run_captured(
            Command::new(&self.bin).arg("-i").arg(&input).arg("-o").arg(&out),
            "astral",
        )?;
        Ok(fs::read_to_string(&out)?.trim().to_string())
    }
}

pub struct IqTreeConstrainedSearch {
    pub bin: String,
}

impl ConstrainedSearch for IqTreeConstrainedSearch {
    fn search(
        &self,
        matrix: &Supermatrix,
        constraint: Option<&str>,
        workdir: &Path,
    ) -> Result<String> {
        let input = workdir.join("supermatrix.aln");
        matrix.write_fasta(&input)?;
        let mut cmd = Command::new(&self.bin);
        cmd.arg("-s").arg(&input).args(["-m", "MFP", "--quiet", "-redo"]);
        if let Some(newick) = constraint {
            let constraint_file = workdir.join("constraint.nwk");
            fs::write(&constraint_file, newick)?;
            cmd.arg("-g").arg(&constraint_file);
        }
        run_captured(&mut cmd, "iqtree constrained search")?;
        let treefile = workdir.join("supermatrix.aln.treefile");
        Ok(fs::read_to_string(&treefile)?.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::OutlierCall;

    fn gene_tree(id: u32, name: &str) -> GeneTree {
        GeneTree {
            locus_id: id,
            locus_name: name.to_string(),
            tree: Tree::parse_newick("((a,b),(c,d));").unwrap(),
            model: "GTR".into(),
        }
    }

    #[test]
    fn outlier_calls_join_back_by_tree_position() {
        // Locus ids and names are arbitrary; only submission order
        // lines up with the collaborator's rows.
        let trees = vec![gene_tree(7, "locus_b"), gene_tree(3, "locus_a")];
        let by_index = HashMap::from([(1, OutlierCall::Ok), (2, OutlierCall::Outlier)]);
        let calls = join_outlier_calls(&trees, &by_index);
        assert_eq!(calls.len(), trees.len());
        assert_eq!(calls[&7], OutlierCall::Ok);
        assert_eq!(calls[&3], OutlierCall::Outlier);
    }

    #[test]
    fn unscored_positions_are_left_out_of_the_join() {
        let trees = vec![gene_tree(1, "a"), gene_tree(2, "b")];
        let by_index = HashMap::from([(2, OutlierCall::Outlier)]);
        let calls = join_outlier_calls(&trees, &by_index);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[&2], OutlierCall::Outlier);
    }
}
