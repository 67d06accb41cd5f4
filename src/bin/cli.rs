use anyhow::Result;
use clap::Parser;
use tracing::{event, Level};

use apollon::analyzer;
use apollon::defs::Args;
use apollon::shell::Shell;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    apollon::init_tracing(args.log_level);

    let analyzer = analyzer::open(&args.trace, &args.store)?;
    event!(Level::INFO, "ready, {} call edges", analyzer.index().len());

    let mut shell = Shell::new(analyzer, args.template.as_deref())?;
    let stdin = std::io::stdin();
    shell.run(stdin.lock(), std::io::stdout())
}
