//! Descriptive and neutrality statistics for the population-genetics
//! run mode. Operates on alignments surviving the same initial
//! filters as the phylogenetics mode; the molecule alphabet decides
//! which characters count as missing.

use crate::repository::Alignment;
use crate::tree::Tree;
use crate::types::MoleculeType;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

fn site_counts(column: &[u8], molecule: MoleculeType) -> HashMap<u8, usize> {
    let mut counts = HashMap::new();
    for &c in column {
        if !molecule.is_missing(c) {
            *counts.entry(c.to_ascii_uppercase()).or_insert(0) += 1;
        }
    }
    counts
}

pub fn harmonic(n: usize) -> f64 {
    (1..=n).map(|i| 1.0 / i as f64).sum()
}

fn harmonic_sq(n: usize) -> f64 {
    (1..=n).map(|i| 1.0 / (i as f64 * i as f64)).sum()
}

pub fn count_segregating_sites(alignment: &Alignment, molecule: MoleculeType) -> usize {
    (0..alignment.n_cols())
        .filter(|&col| site_counts(&alignment.column(col), molecule).len() >= 2)
        .count()
}

/// Sites where the rarest allele is carried by exactly one sequence.
pub fn count_singletons(alignment: &Alignment, molecule: MoleculeType) -> usize {
    (0..alignment.n_cols())
        .filter(|&col| {
            let counts = site_counts(&alignment.column(col), molecule);
            counts.len() >= 2 && counts.values().min() == Some(&1)
        })
        .count()
}

/// Sites with at least two states each present in at least two
/// sequences.
pub fn count_parsimony_informative(alignment: &Alignment, molecule: MoleculeType) -> usize {
    (0..alignment.n_cols())
        .filter(|&col| {
            site_counts(&alignment.column(col), molecule)
                .values()
                .filter(|&&c| c >= 2)
                .count()
                >= 2
        })
        .count()
}

/// Mean number of pairwise differences across all sequence pairs,
/// missing positions excluded from each comparison.
pub fn mean_pairwise_differences(alignment: &Alignment, molecule: MoleculeType) -> f64 {
    let n = alignment.n_rows();
    if n < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            let a = alignment.rows[i].as_bytes();
            let b = alignment.rows[j].as_bytes();
            let diffs = a
                .iter()
                .zip(b)
                .filter(|(&x, &y)| {
                    !molecule.is_missing(x)
                        && !molecule.is_missing(y)
                        && x.to_ascii_uppercase() != y.to_ascii_uppercase()
                })
                .count();
            total += diffs as f64;
            pairs += 1;
        }
    }
    total / pairs as f64
}

pub fn mean_pairwise_identity(alignment: &Alignment, molecule: MoleculeType) -> f64 {
    let n = alignment.n_rows();
    if n < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            let a = alignment.rows[i].as_bytes();
            let b = alignment.rows[j].as_bytes();
            let mut compared = 0usize;
            let mut matched = 0usize;
            for (&x, &y) in a.iter().zip(b) {
                let (x, y) = (x.to_ascii_uppercase(), y.to_ascii_uppercase());
                if molecule.is_missing(x) || molecule.is_missing(y) {
                    continue;
                }
                compared += 1;
                if x == y {
                    matched += 1;
                }
            }
            if compared > 0 {
                total += matched as f64 / compared as f64;
                pairs += 1;
            }
        }
    }
    if pairs == 0 {
        1.0
    } else {
        total / pairs as f64
    }
}

/// Watterson's estimator per gene: S / a1(n-1).
pub fn watterson_theta(segregating: usize, n_sequences: usize) -> f64 {
    if n_sequences < 2 || segregating == 0 {
        return 0.0;
    }
    segregating as f64 / harmonic(n_sequences - 1)
}

/// Tajima's D. None when the alignment carries no variation or too
/// few sequences for the variance terms.
pub fn tajimas_d(pi_per_gene: f64, segregating: usize, n_sequences: usize) -> Option<f64> {
    if segregating == 0 || n_sequences < 4 {
        return None;
    }
    let n = n_sequences as f64;
    let s = segregating as f64;
    let a1 = harmonic(n_sequences - 1);
    let a2 = harmonic_sq(n_sequences - 1);
    let b1 = (n + 1.0) / (3.0 * (n - 1.0));
    let b2 = 2.0 * (n * n + n + 3.0) / (9.0 * n * (n - 1.0));
    let c1 = b1 - 1.0 / a1;
    let c2 = b2 - (n + 2.0) / (a1 * n) + a2 / (a1 * a1);
    let e1 = c1 / a1;
    let e2 = c2 / (a1 * a1 + a2);
    let variance = e1 * s + e2 * s * (s - 1.0);
    if variance <= 0.0 {
        return None;
    }
    Some((pi_per_gene - s / a1) / variance.sqrt())
}

/// Fu and Li's D* (no outgroup; singleton-based).
pub fn fu_li_d_star(segregating: usize, singletons: usize, n_sequences: usize) -> Option<f64> {
    if segregating == 0 || n_sequences < 4 {
        return None;
    }
    let n = n_sequences as f64;
    let s = segregating as f64;
    let eta_s = singletons as f64;
    let a_n = harmonic(n_sequences - 1);
    let b_n = harmonic_sq(n_sequences - 1);
    let a_n1 = a_n + 1.0 / n;
    let c_n = 2.0 * (n * a_n - 2.0 * (n - 1.0)) / ((n - 1.0) * (n - 2.0));
    let d_n = c_n
        + (n - 2.0) / ((n - 1.0) * (n - 1.0))
        + (2.0 / (n - 1.0)) * (1.5 - (2.0 * a_n1 - 3.0) / (n - 2.0) - 1.0 / n);
    let frac = n / (n - 1.0);
    let v = (frac * frac * b_n + a_n * a_n * d_n
        - 2.0 * (n * a_n * (a_n + 1.0)) / ((n - 1.0) * (n - 1.0)))
        / (a_n * a_n + b_n);
    let u = frac * (a_n - frac) - v;
    let variance = u * s + v * s * s;
    if variance <= 0.0 {
        return None;
    }
    Some((frac * s - a_n * eta_s) / variance.sqrt())
}

/// Observed parsimony length of the alignment on the tree, by Fitch
/// counting per site. Missing residues constrain nothing.
pub fn fitch_length(tree: &Tree, alignment: &Alignment, molecule: MoleculeType) -> usize {
    let mut total = 0;
    for col in 0..alignment.n_cols() {
        let column = alignment.column(col);
        // Map the site's observed states to bits.
        let mut bit_of: HashMap<u8, u32> = HashMap::new();
        for &c in &column {
            if !molecule.is_missing(c) {
                let next = bit_of.len() as u32;
                bit_of.entry(c).or_insert(1 << next);
            }
        }
        if bit_of.len() < 2 {
            continue;
        }
        let full: u32 = bit_of.values().fold(0, |acc, b| acc | b);
        let state_of = |taxon: &str| -> u32 {
            match alignment.taxa.iter().position(|t| t == taxon) {
                Some(i) => {
                    let c = column[i];
                    if molecule.is_missing(c) {
                        full
                    } else {
                        bit_of[&c]
                    }
                }
                None => full,
            }
        };
        total += fitch_node(tree, tree.root(), &state_of).1;
    }
    total
}

fn fitch_node(tree: &Tree, idx: usize, state_of: &dyn Fn(&str) -> u32) -> (u32, usize) {
    let node = tree.node(idx);
    if node.children.is_empty() {
        let set = node.label.as_deref().map(state_of).unwrap_or(u32::MAX);
        return (set, 0);
    }
    let mut changes = 0;
    let mut set = u32::MAX;
    for &child in &node.children {
        let (child_set, child_changes) = fitch_node(tree, child, state_of);
        changes += child_changes;
        let inter = set & child_set;
        if inter == 0 {
            set |= child_set;
            changes += 1;
        } else {
            set = inter;
        }
    }
    (set, changes)
}

/// Minimum conceivable number of changes: one less than the number of
/// observed states, summed over variable sites.
pub fn minimum_changes(alignment: &Alignment, molecule: MoleculeType) -> usize {
    (0..alignment.n_cols())
        .map(|col| {
            site_counts(&alignment.column(col), molecule)
                .len()
                .saturating_sub(1)
        })
        .sum()
}

/// One row of the population-genetics summary table.
#[derive(Debug)]
pub struct PopGenRow {
    pub locus_name: String,
    pub n_sequences: usize,
    pub alignment_length: usize,
    pub mean_identity: f64,
    pub informative_sites: usize,
    pub consistency_index: f64,
    pub homoplasy_index: f64,
    pub segregating_sites: usize,
    pub singletons: usize,
    pub pi_per_gene: f64,
    pub pi_per_site: f64,
    pub theta_per_gene: f64,
    pub theta_per_site: f64,
    pub tajimas_d: Option<f64>,
    pub fu_li_d_star: Option<f64>,
}

pub fn summarize(alignment: &Alignment, tree: Option<&Tree>, molecule: MoleculeType) -> PopGenRow {
    let n = alignment.n_rows();
    let length = alignment.n_cols();
    let segregating = count_segregating_sites(alignment, molecule);
    let singletons = count_singletons(alignment, molecule);
    let pi_per_gene = mean_pairwise_differences(alignment, molecule);
    let theta_per_gene = watterson_theta(segregating, n);

    let (ci, hi) = match tree {
        Some(tree) => {
            let observed = fitch_length(tree, alignment, molecule);
            if observed == 0 {
                (1.0, 0.0)
            } else {
                let ci = minimum_changes(alignment, molecule) as f64 / observed as f64;
                (ci, 1.0 - ci)
            }
        }
        None => (1.0, 0.0),
    };

    PopGenRow {
        locus_name: alignment.locus_name.clone(),
        n_sequences: n,
        alignment_length: length,
        mean_identity: mean_pairwise_identity(alignment, molecule),
        informative_sites: count_parsimony_informative(alignment, molecule),
        consistency_index: ci,
        homoplasy_index: hi,
        segregating_sites: segregating,
        singletons,
        pi_per_gene,
        pi_per_site: if length > 0 {
            pi_per_gene / length as f64
        } else {
            0.0
        },
        theta_per_gene,
        theta_per_site: if length > 0 {
            theta_per_gene / length as f64
        } else {
            0.0
        },
        tajimas_d: tajimas_d(pi_per_gene, segregating, n),
        fu_li_d_star: fu_li_d_star(segregating, singletons, n),
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(v) => format!("{:.4}", v),
        None => "NA".to_string(),
    }
}

pub fn write_table(rows: &[PopGenRow], path: &Path) -> anyhow::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(
        out,
        "locus\tn_seqs\taln_len\tmean_identity\tinformative_sites\tCI\tHI\tseg_sites\t\
         singletons\tpi_gene\tpi_site\ttheta_gene\ttheta_site\ttajima_d\tfu_li_d_star"
    )?;
    for r in rows {
        writeln!(
            out,
            "{}\t{}\t{}\t{:.4}\t{}\t{:.4}\t{:.4}\t{}\t{}\t{:.4}\t{:.6}\t{:.4}\t{:.6}\t{}\t{}",
            r.locus_name,
            r.n_sequences,
            r.alignment_length,
            r.mean_identity,
            r.informative_sites,
            r.consistency_index,
            r.homoplasy_index,
            r.segregating_sites,
            r.singletons,
            r.pi_per_gene,
            r.pi_per_site,
            r.theta_per_gene,
            r.theta_per_site,
            fmt_opt(r.tajimas_d),
            fmt_opt(r.fu_li_d_star),
        )?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NT: MoleculeType = MoleculeType::Nucleotide;

    fn alignment(rows: &[(&str, &str)]) -> Alignment {
        Alignment {
            locus_id: 0,
            locus_name: "locus_a".into(),
            taxa: rows.iter().map(|(t, _)| t.to_string()).collect(),
            rows: rows.iter().map(|(_, s)| s.to_string()).collect(),
        }
    }

    #[test]
    fn segregating_and_singleton_sites_are_counted() {
        let a = alignment(&[
            ("t1", "ACGTA"),
            ("t2", "ACGTA"),
            ("t3", "ACCTA"),
            ("t4", "ATCTA"),
        ]);
        // Site 2: C,C,C->C/C? rows: col1 = C,C,C,T -> segregating,
        // singleton; col2 = G,G,C,C -> segregating, informative.
        assert_eq!(count_segregating_sites(&a, NT), 2);
        assert_eq!(count_singletons(&a, NT), 1);
        assert_eq!(count_parsimony_informative(&a, NT), 1);
    }

    #[test]
    fn protein_asparagine_sites_count_as_variation() {
        let a = alignment(&[("t1", "NA"), ("t2", "NA"), ("t3", "KA"), ("t4", "KA")]);
        // N is the unknown base under the nucleotide alphabet but a
        // real residue under the protein one.
        assert_eq!(count_segregating_sites(&a, NT), 0);
        assert_eq!(count_segregating_sites(&a, MoleculeType::Protein), 1);
        assert_eq!(count_parsimony_informative(&a, MoleculeType::Protein), 1);
        let pi = mean_pairwise_differences(&a, MoleculeType::Protein);
        // Pairs differing at the N/K site: 4 of 6.
        assert!((pi - 4.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn invariant_alignment_has_no_statistics() {
        let a = alignment(&[("t1", "AAAA"), ("t2", "AAAA"), ("t3", "AAAA"), ("t4", "AAAA")]);
        assert_eq!(count_segregating_sites(&a, NT), 0);
        assert_eq!(watterson_theta(0, 4), 0.0);
        assert!(tajimas_d(0.0, 0, 4).is_none());
        assert!(fu_li_d_star(0, 0, 4).is_none());
        let row = summarize(&a, None, NT);
        assert!((row.mean_identity - 1.0).abs() < 1e-12);
        assert_eq!(row.tajimas_d, None);
    }

    #[test]
    fn watterson_theta_uses_the_harmonic_number() {
        // S=3, n=4: a1 = 1 + 1/2 + 1/3 = 11/6.
        let theta = watterson_theta(3, 4);
        assert!((theta - 3.0 / (11.0 / 6.0)).abs() < 1e-9);
    }

    #[test]
    fn pairwise_differences_match_hand_count() {
        let a = alignment(&[("t1", "AAAA"), ("t2", "AAAT"), ("t3", "AATT")]);
        // Pairs: (t1,t2)=1, (t1,t3)=2, (t2,t3)=1 -> mean 4/3.
        let pi = mean_pairwise_differences(&a, NT);
        assert!((pi - 4.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn tajimas_d_is_zero_when_pi_equals_expectation() {
        let s = 5;
        let n = 6;
        let pi = s as f64 / harmonic(n - 1);
        let d = tajimas_d(pi, s, n).unwrap();
        assert!(d.abs() < 1e-9);
    }

    #[test]
    fn fitch_length_counts_minimal_changes_on_a_clean_site() {
        let tree = Tree::parse_newick("((t1,t2),(t3,t4));").unwrap();
        let a = alignment(&[("t1", "A"), ("t2", "A"), ("t3", "C"), ("t4", "C")]);
        // One change suffices on the split topology.
        assert_eq!(fitch_length(&tree, &a, NT), 1);
        assert_eq!(minimum_changes(&a, NT), 1);
        let row = summarize(&a, Some(&tree), NT);
        assert!((row.consistency_index - 1.0).abs() < 1e-12);
        assert!((row.homoplasy_index - 0.0).abs() < 1e-12);
    }

    #[test]
    fn homoplasy_shows_when_the_tree_conflicts_with_the_site() {
        let tree = Tree::parse_newick("((t1,t3),(t2,t4));").unwrap();
        let a = alignment(&[("t1", "A"), ("t2", "A"), ("t3", "C"), ("t4", "C")]);
        // The grouping forces two independent origins.
        assert_eq!(fitch_length(&tree, &a, NT), 2);
        let row = summarize(&a, Some(&tree), NT);
        assert!((row.consistency_index - 0.5).abs() < 1e-12);
        assert!((row.homoplasy_index - 0.5).abs() < 1e-12);
    }
}
