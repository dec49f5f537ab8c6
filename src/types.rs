#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum MoleculeType {
    #[value(name = "nt")]
    Nucleotide,
    #[value(name = "aa")]
    Protein,
}

impl MoleculeType {
    /// Residue characters accepted without normalization, aside from
    /// gap and unknown symbols which are always legal.
    pub fn legal_residues(&self) -> &'static str {
        match self {
            MoleculeType::Nucleotide => "ACGTUMRWSYKVHDBN",
            MoleculeType::Protein => "ACDEFGHIKLMNPQRSTVWYXBZJ",
        }
    }

    /// Whether a residue character carries no state for this molecule.
    /// `N` is the unknown base for nucleotides but asparagine for
    /// proteins, so the set depends on the alphabet.
    pub fn is_missing(&self, c: u8) -> bool {
        match (self, c.to_ascii_uppercase()) {
            (_, b'-' | b'.' | b'?') => true,
            (MoleculeType::Nucleotide, b'N' | b'X') => true,
            (MoleculeType::Protein, b'X') => true,
            _ => false,
        }
    }
}

/// Tree-search engine used for gene-tree estimation. Determines the
/// scale branch supports arrive in before normalization to 0-1.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum TreeEngine {
    /// Ultrafast bootstrap percentages (0-100)
    #[value(name = "iqtree")]
    IqTree,
    /// SH-like local supports, already on 0-1
    #[value(name = "fasttree")]
    FastTree,
}

impl TreeEngine {
    pub fn support_divisor(&self) -> f64 {
        match self {
            TreeEngine::IqTree => 100.0,
            TreeEngine::FastTree => 1.0,
        }
    }

    /// Whether the engine exposes likelihood mapping, enabling the
    /// quartet-resolution screen.
    pub fn supports_likelihood_mapping(&self) -> bool {
        matches!(self, TreeEngine::IqTree)
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum RootingMethod {
    #[value(name = "midpoint")]
    Midpoint,
    #[value(name = "outgroup")]
    Outgroup,
}

/// How the phylogenetic-signal and likelihood-resolution screens are
/// combined when both are active.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum CombinePolicy {
    /// A locus must pass both screens.
    #[value(name = "intersection")]
    Intersection,
    /// A locus passing either screen is kept.
    #[value(name = "union")]
    Union,
}
