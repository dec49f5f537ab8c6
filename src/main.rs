use clap::Parser;
use phylomark::cli;
use phylomark::commands;
use phylomark::error::PipelineError;

fn main() {
    let args = cli::Args::parse();

    let result = match args.command {
        cli::Commands::Phylo(opts) => commands::phylo::run(opts),
        cli::Commands::Popgen(opts) => commands::popgen::run(opts),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<PipelineError>()
            .map(|p| p.exit_code())
            .unwrap_or(1);
        std::process::exit(code);
    }
}
