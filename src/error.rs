use std::fmt;

/// Fatal and stage-level error conditions for a pipeline run.
///
/// Per-locus job failures are not represented here; they travel as
/// `Result` values through the dispatcher and are aggregated by the
/// stage that owns them.
#[derive(Debug)]
pub enum PipelineError {
    /// Malformed or mismatched input detected at ingestion.
    Structural(String),
    /// An external collaborator cannot run. The owning stage decides
    /// whether this degrades to a pass-through or aborts the run.
    ToolUnavailable { tool: String, detail: String },
    /// A filter stage left zero surviving loci.
    StageExhaustion { stage: String, examined: usize },
    /// A constituent alignment's taxon set differs from the reference.
    TaxonMismatch { locus: String, detail: String },
    /// All tree estimators failed in the consensus stage.
    NoTreeEstimate(String),
    Io(std::io::Error),
    Parse(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Structural(msg) => write!(f, "structural input error: {}", msg),
            PipelineError::ToolUnavailable { tool, detail } => {
                write!(f, "external tool '{}' unavailable: {}", tool, detail)
            }
            PipelineError::StageExhaustion { stage, examined } => write!(
                f,
                "stage '{}' removed all {} remaining loci; nothing left to analyze",
                stage, examined
            ),
            PipelineError::TaxonMismatch { locus, detail } => {
                write!(f, "taxon set mismatch in locus '{}': {}", locus, detail)
            }
            PipelineError::NoTreeEstimate(msg) => {
                write!(f, "no tree estimator succeeded: {}", msg)
            }
            PipelineError::Io(e) => write!(f, "I/O error: {}", e),
            PipelineError::Parse(msg) => write!(f, "parse error: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Io(e)
    }
}

impl PipelineError {
    /// Distinguishing process exit code for fatal conditions.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Structural(_) => 2,
            PipelineError::StageExhaustion { .. } => 3,
            PipelineError::TaxonMismatch { .. } => 4,
            PipelineError::ToolUnavailable { .. } => 5,
            PipelineError::NoTreeEstimate(_) => 6,
            PipelineError::Io(_) | PipelineError::Parse(_) => 1,
        }
    }
}
