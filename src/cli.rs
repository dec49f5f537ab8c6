use crate::types::{CombinePolicy, MoleculeType, RootingMethod, TreeEngine};
use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Filter loci, then build the supermatrix and consensus/species trees
    Phylo(PhyloOpts),

    /// Filter loci, then report descriptive and neutrality statistics
    Popgen(PopgenOpts),
}

#[derive(ClapArgs)]
pub struct PhyloOpts {
    #[command(flatten)]
    pub shared: SharedOpts,

    /// Minimum mean branch support on the 0-1 scale
    #[arg(long)]
    pub min_support: Option<f64>,

    /// Minimum percentage of fully resolved quartets
    #[arg(long)]
    pub min_resolved: Option<f64>,

    /// Outlier-screen stringency (smaller is stricter)
    #[arg(long)]
    pub stringency: Option<f64>,

    /// How the support and resolution screens combine when both run
    #[arg(long, value_enum, default_value = "intersection")]
    pub combine: CombinePolicy,

    /// Rooting method for the final supermatrix tree
    #[arg(long, value_enum)]
    pub rooting: Option<RootingMethod>,

    /// Outgroup taxon, required with --rooting outgroup
    #[arg(long)]
    pub outgroup: Option<String>,

    /// Skip the likelihood-resolution screen even when the engine
    /// supports it
    #[arg(long)]
    pub no_likelihood_mapping: bool,
}

#[derive(ClapArgs)]
pub struct PopgenOpts {
    #[command(flatten)]
    pub shared: SharedOpts,
}

#[derive(ClapArgs)]
pub struct SharedOpts {
    /// Directory of nucleotide FASTA files (.fna)
    pub nuc_dir: String,

    /// Directory of protein FASTA files (.faa)
    pub prot_dir: String,

    /// Output directory for all run artifacts
    #[arg(short = 'o', long = "output", default_value = "phylomark_out")]
    pub output_dir: String,

    /// Molecule type used for alignment and tree search
    #[arg(long, value_enum, default_value = "nt")]
    pub molecule: MoleculeType,

    /// Tree-search engine
    #[arg(long, value_enum, default_value = "iqtree")]
    pub engine: TreeEngine,

    /// Minimum taxa per locus (at least 4)
    #[arg(long, default_value = "4")]
    pub min_taxa: usize,

    /// Worker ceiling for parallel stages (default: all available
    /// processing units)
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Significance threshold for the recombination screen
    #[arg(long)]
    pub alpha: Option<f64>,
}
