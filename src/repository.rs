use crate::error::PipelineError;
use crate::types::MoleculeType;
use bio::io::fasta;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// One sequence record within a locus.
#[derive(Debug, Clone)]
pub struct SeqRecord {
    pub taxon: String,
    pub seq: String,
}

/// A candidate orthologous gene cluster with paired nucleotide and
/// protein representations. Immutable after ingestion; the pipeline
/// only ever removes loci from the working set, never edits them.
#[derive(Debug, Clone)]
pub struct Locus {
    pub id: u32,
    pub name: String,
    pub nuc: Vec<SeqRecord>,
    pub prot: Vec<SeqRecord>,
    pub source: PathBuf,
}

impl Locus {
    pub fn taxa(&self) -> BTreeSet<&str> {
        self.nuc.iter().map(|r| r.taxon.as_str()).collect()
    }

    pub fn records(&self, molecule: MoleculeType) -> &[SeqRecord] {
        match molecule {
            MoleculeType::Nucleotide => &self.nuc,
            MoleculeType::Protein => &self.prot,
        }
    }
}

/// Sanitization counters reported after ingestion. Anomalies are
/// corrected in place rather than rejected.
#[derive(Debug, Default, Clone)]
pub struct NormalizationReport {
    pub relabeled_duplicates: usize,
    pub masked_residues: usize,
}

impl NormalizationReport {
    pub fn is_clean(&self) -> bool {
        self.relabeled_duplicates == 0 && self.masked_residues == 0
    }
}

/// Multiple-sequence alignment over a fixed taxon ordering. Rows are
/// parallel to `taxa` and equal in length.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub locus_id: u32,
    pub locus_name: String,
    pub taxa: Vec<String>,
    pub rows: Vec<String>,
}

impl Alignment {
    pub fn n_cols(&self) -> usize {
        self.rows.first().map(|r| r.len()).unwrap_or(0)
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn taxon_set(&self) -> BTreeSet<&str> {
        self.taxa.iter().map(|t| t.as_str()).collect()
    }

    pub fn row_for(&self, taxon: &str) -> Option<&str> {
        self.taxa
            .iter()
            .position(|t| t == taxon)
            .map(|i| self.rows[i].as_str())
    }

    /// Residues of one column, uppercased, gaps included.
    pub fn column(&self, col: usize) -> Vec<u8> {
        self.rows
            .iter()
            .map(|r| r.as_bytes()[col].to_ascii_uppercase())
            .collect()
    }
}

fn read_fasta(path: &Path) -> Result<Vec<SeqRecord>, PipelineError> {
    let reader = fasta::Reader::from_file(path).map_err(|e| {
        PipelineError::Structural(format!("cannot read '{}': {}", path.display(), e))
    })?;
    let mut records = Vec::new();
    for result in reader.records() {
        let rec = result.map_err(|e| {
            PipelineError::Structural(format!("bad FASTA record in '{}': {}", path.display(), e))
        })?;
        records.push(SeqRecord {
            taxon: rec.id().to_string(),
            seq: String::from_utf8_lossy(rec.seq()).into_owned(),
        });
    }
    Ok(records)
}

/// Suffix duplicate taxon labels (`taxon__2`, `taxon__3`, ...) and mask
/// residues outside the molecule's alphabet with gaps.
fn normalize(records: &mut [SeqRecord], molecule: MoleculeType, report: &mut NormalizationReport) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for rec in records.iter_mut() {
        let count = seen.entry(rec.taxon.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            rec.taxon = format!("{}__{}", rec.taxon, count);
            report.relabeled_duplicates += 1;
        }
    }
    let legal = molecule.legal_residues();
    for rec in records.iter_mut() {
        let cleaned: String = rec
            .seq
            .chars()
            .map(|c| {
                let up = c.to_ascii_uppercase();
                if up == '-' || up == '.' || up == '*' || legal.contains(up) {
                    up
                } else {
                    report.masked_residues += 1;
                    '-'
                }
            })
            .collect();
        rec.seq = cleaned;
    }
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Ingest paired nucleotide/protein FASTA files into the immutable
/// locus set. All-or-nothing at the count level: differing file counts
/// or a taxon-set mismatch within any pair aborts the run. Per-record
/// anomalies are normalized in place and counted.
pub fn ingest(
    nuc_files: &[PathBuf],
    prot_files: &[PathBuf],
) -> Result<(Vec<Locus>, NormalizationReport), PipelineError> {
    if nuc_files.len() != prot_files.len() {
        return Err(PipelineError::Structural(format!(
            "{} nucleotide files but {} protein files; the two sets must pair 1:1",
            nuc_files.len(),
            prot_files.len()
        )));
    }
    let mut report = NormalizationReport::default();
    let mut loci = Vec::with_capacity(nuc_files.len());
    for (id, (nuc_path, prot_path)) in nuc_files.iter().zip(prot_files).enumerate() {
        let mut nuc = read_fasta(nuc_path)?;
        let mut prot = read_fasta(prot_path)?;
        normalize(&mut nuc, MoleculeType::Nucleotide, &mut report);
        normalize(&mut prot, MoleculeType::Protein, &mut report);

        if nuc.len() != prot.len() {
            return Err(PipelineError::Structural(format!(
                "locus '{}': {} nucleotide records but {} protein records",
                stem(nuc_path),
                nuc.len(),
                prot.len()
            )));
        }
        let nuc_taxa: BTreeSet<&str> = nuc.iter().map(|r| r.taxon.as_str()).collect();
        let prot_taxa: BTreeSet<&str> = prot.iter().map(|r| r.taxon.as_str()).collect();
        if nuc_taxa != prot_taxa {
            return Err(PipelineError::Structural(format!(
                "locus '{}': nucleotide and protein taxon sets differ",
                stem(nuc_path)
            )));
        }
        loci.push(Locus {
            id: id as u32,
            name: stem(nuc_path),
            nuc,
            prot,
            source: nuc_path.clone(),
        });
    }
    Ok((loci, report))
}

/// Collect FASTA files from a directory, sorted by name so locus ids
/// are stable across runs.
pub fn list_fasta_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, PipelineError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map(|e| e == extension).unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
