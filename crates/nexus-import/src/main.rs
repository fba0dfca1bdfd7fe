use anyhow::Result;
use clap::Parser;
use nexus_import::{Cli, init_tracing, run};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);
    run(cli)
}
