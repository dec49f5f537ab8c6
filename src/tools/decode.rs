//! Typed decoders for collaborator text output. Every brittle format
//! coupling lives here, behind functions returning crate types.

use super::{OutlierCall, RecombVerdict};
use crate::error::PipelineError;
use std::collections::HashMap;

/// Decode PhiPack stdout into a recombination verdict. The program
/// prints one labeled p-value line per approximation and a distinctive
/// phrase when the alignment has too few informative sites.
pub fn phi_output(text: &str) -> Result<RecombVerdict, PipelineError> {
    if text.contains("Too few informative sites") {
        return Ok(RecombVerdict::Inconclusive);
    }
    let mut normal = None;
    let mut permutation = None;
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("PHI (Normal):") {
            normal = rest.trim().parse::<f64>().ok();
        } else if let Some(rest) = line.strip_prefix("PHI (Permutation):") {
            permutation = rest.trim().parse::<f64>().ok();
        }
    }
    match (normal, permutation) {
        (Some(normal), Some(permutation)) => Ok(RecombVerdict::PValues {
            normal,
            permutation,
        }),
        _ => Err(PipelineError::Parse(
            "recombination test output lacked the expected p-value lines".into(),
        )),
    }
}

/// Decode the outlier collaborator's two-column table:
/// `<1-based tree index>\t<ok|outlier>` per line, comments with '#'.
/// Rows are keyed by position in the submitted tree list; the
/// collaborator never sees locus names.
pub fn outlier_table(text: &str) -> Result<HashMap<usize, OutlierCall>, PipelineError> {
    let mut calls = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut cols = line.split('\t');
        let index: usize = cols
            .next()
            .unwrap_or_default()
            .trim()
            .parse()
            .map_err(|_| {
                PipelineError::Parse(format!("outlier table row lacks a tree index: '{}'", line))
            })?;
        let call = cols.next().ok_or_else(|| {
            PipelineError::Parse(format!("outlier table row missing verdict: '{}'", line))
        })?;
        let call = match call {
            "ok" => OutlierCall::Ok,
            "outlier" => OutlierCall::Outlier,
            other => {
                return Err(PipelineError::Parse(format!(
                    "unknown outlier verdict '{}'",
                    other
                )))
            }
        };
        calls.insert(index, call);
    }
    Ok(calls)
}

/// Pull the percentage of fully resolved quartets out of an IQ-TREE
/// likelihood-mapping report line:
/// `Number of fully resolved  quartets (regions 1+2+3): 1883 (=94.15%)`
pub fn likelihood_mapping_percent(text: &str) -> Result<f64, PipelineError> {
    for line in text.lines() {
        if line.contains("fully resolved") && line.contains("quartets") {
            if let Some(start) = line.find("(=") {
                let rest = &line[start + 2..];
                if let Some(end) = rest.find('%') {
                    return rest[..end].trim().parse::<f64>().map_err(|_| {
                        PipelineError::Parse(format!("bad quartet percentage in '{}'", line))
                    });
                }
            }
        }
    }
    Err(PipelineError::Parse(
        "likelihood-mapping report lacked a resolved-quartet line".into(),
    ))
}

/// Best-fit substitution model from an IQ-TREE report.
pub fn best_fit_model(text: &str) -> Option<String> {
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("Best-fit model:") {
            let model = rest.trim().split_whitespace().next()?;
            return Some(model.to_string());
        }
    }
    None
}
