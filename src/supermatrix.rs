use crate::error::PipelineError;
use crate::repository::Alignment;
use crate::types::MoleculeType;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::Path;

/// Concatenation of all surviving alignments, column order equal to
/// survival order, with per-locus partition ranges retained for
/// downstream partitioned analyses.
#[derive(Debug, Clone)]
pub struct Supermatrix {
    pub taxa: Vec<String>,
    pub rows: Vec<String>,
    pub partitions: Vec<(String, Range<usize>)>,
}

impl Supermatrix {
    pub fn n_cols(&self) -> usize {
        self.rows.first().map(|r| r.len()).unwrap_or(0)
    }

    pub fn write_fasta(&self, path: &Path) -> anyhow::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for (taxon, row) in self.taxa.iter().zip(&self.rows) {
            writeln!(out, ">{}", taxon)?;
            writeln!(out, "{}", row)?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn write_partitions(&self, path: &Path) -> anyhow::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for (name, range) in &self.partitions {
            // 1-based inclusive coordinates, the convention partition
            // files use.
            writeln!(out, "DNA, {} = {}-{}", name, range.start + 1, range.end)?;
        }
        out.flush()?;
        Ok(())
    }
}

/// Concatenate alignments in the given (survival) order. The first
/// alignment's taxon ordering becomes the reference row order; any
/// constituent whose taxon set differs fails the whole assembly.
pub fn concatenate(alignments: &[Alignment]) -> Result<Supermatrix, PipelineError> {
    let first = alignments.first().ok_or_else(|| {
        PipelineError::StageExhaustion {
            stage: "supermatrix".to_string(),
            examined: 0,
        }
    })?;
    let taxa = first.taxa.clone();
    let reference = first.taxon_set();
    let mut rows = vec![String::new(); taxa.len()];
    let mut partitions = Vec::with_capacity(alignments.len());
    let mut offset = 0;

    for alignment in alignments {
        if alignment.taxon_set() != reference {
            return Err(PipelineError::TaxonMismatch {
                locus: alignment.locus_name.clone(),
                detail: format!(
                    "expected the {} taxa of '{}'",
                    reference.len(),
                    first.locus_name
                ),
            });
        }
        let width = alignment.n_cols();
        for (row, taxon) in rows.iter_mut().zip(&taxa) {
            // Safe: the taxon-set check above guarantees presence.
            row.push_str(alignment.row_for(taxon).unwrap_or_default());
        }
        partitions.push((alignment.locus_name.clone(), offset..offset + width));
        offset += width;
    }

    Ok(Supermatrix {
        taxa,
        rows,
        partitions,
    })
}

/// Remove columns that are invariant across all taxa (ignoring gaps
/// and the molecule's unknown symbols), keeping partition ranges
/// consistent with the surviving columns.
pub fn strip_uninformative(matrix: &Supermatrix, molecule: MoleculeType) -> Supermatrix {
    let n_cols = matrix.n_cols();
    let mut keep = Vec::with_capacity(n_cols);
    for col in 0..n_cols {
        let mut state: Option<u8> = None;
        let mut variable = false;
        for row in &matrix.rows {
            let c = row.as_bytes()[col].to_ascii_uppercase();
            if molecule.is_missing(c) {
                continue;
            }
            match state {
                None => state = Some(c),
                Some(s) if s != c => {
                    variable = true;
                    break;
                }
                Some(_) => {}
            }
        }
        keep.push(variable);
    }

    let rows: Vec<String> = matrix
        .rows
        .iter()
        .map(|row| {
            row.bytes()
                .zip(&keep)
                .filter(|(_, &k)| k)
                .map(|(b, _)| b as char)
                .collect()
        })
        .collect();

    // Remap each partition to its share of kept columns.
    let mut partitions = Vec::with_capacity(matrix.partitions.len());
    let mut offset = 0;
    for (name, range) in &matrix.partitions {
        let kept = keep[range.clone()].iter().filter(|&&k| k).count();
        partitions.push((name.clone(), offset..offset + kept));
        offset += kept;
    }

    Supermatrix {
        taxa: matrix.taxa.clone(),
        rows,
        partitions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alignment(id: u32, name: &str, rows: &[(&str, &str)]) -> Alignment {
        Alignment {
            locus_id: id,
            locus_name: name.to_string(),
            taxa: rows.iter().map(|(t, _)| t.to_string()).collect(),
            rows: rows.iter().map(|(_, s)| s.to_string()).collect(),
        }
    }

    #[test]
    fn concatenation_preserves_survival_order() {
        let a = alignment(0, "a", &[("t1", "ACGT"), ("t2", "ACGA")]);
        let b = alignment(1, "b", &[("t2", "GG"), ("t1", "GC")]);
        let matrix = concatenate(&[a, b]).unwrap();
        assert_eq!(matrix.taxa, vec!["t1", "t2"]);
        // Rows follow the first alignment's taxon order even when a
        // later constituent lists taxa differently.
        assert_eq!(matrix.rows, vec!["ACGTGC", "ACGAGG"]);
        assert_eq!(matrix.partitions[0], ("a".to_string(), 0..4));
        assert_eq!(matrix.partitions[1], ("b".to_string(), 4..6));
    }

    #[test]
    fn taxon_mismatch_fails_assembly() {
        let a = alignment(0, "a", &[("t1", "ACGT"), ("t2", "ACGA")]);
        let b = alignment(1, "b", &[("t1", "GG"), ("tX", "GC")]);
        let err = concatenate(&[a, b]).unwrap_err();
        assert!(matches!(err, PipelineError::TaxonMismatch { .. }));
    }

    #[test]
    fn concatenation_is_idempotent() {
        let a = alignment(0, "a", &[("t1", "ACGT"), ("t2", "ACGA")]);
        let b = alignment(1, "b", &[("t1", "GC"), ("t2", "GG")]);
        let once = concatenate(&[a.clone(), b.clone()]).unwrap();
        let twice = concatenate(&[a, b]).unwrap();
        assert_eq!(once.rows, twice.rows);
        assert_eq!(once.taxa, twice.taxa);
    }

    #[test]
    fn invariant_columns_are_stripped() {
        let a = alignment(0, "a", &[("t1", "AAGT"), ("t2", "ACGT"), ("t3", "AC-T")]);
        let matrix = concatenate(&[a]).unwrap();
        let stripped = strip_uninformative(&matrix, MoleculeType::Nucleotide);
        // Column 0 (all A), 2 (G/G/-), 3 (all T) are invariant.
        assert_eq!(stripped.rows, vec!["A", "C", "C"]);
        assert_eq!(stripped.partitions[0].1, 0..1);
    }

    #[test]
    fn protein_asparagine_columns_are_retained() {
        let a = alignment(
            0,
            "a",
            &[("t1", "NA"), ("t2", "NA"), ("t3", "KA"), ("t4", "KA")],
        );
        let matrix = concatenate(&[a]).unwrap();
        // As a nucleotide column N is unknown, so N/N/K/K collapses to
        // invariant K; as a protein column it is a real substitution.
        assert_eq!(strip_uninformative(&matrix, MoleculeType::Nucleotide).n_cols(), 0);
        let aa = strip_uninformative(&matrix, MoleculeType::Protein);
        assert_eq!(aa.rows, vec!["N", "N", "K", "K"]);
    }
}
