mod repl;

use anyhow::Context;
use clap::Parser;
use liminaldb_core::{DbPath, Engine};
use std::path::PathBuf;
use std::process::ExitCode;

/// LiminalDB: a single-node relational storage engine.
#[derive(Parser)]
#[command(name = "liminaldb", version, about)]
struct Args {
    /// Database root directory.
    #[arg(long, default_value = "db")]
    db_path: PathBuf,

    /// Serve the HTTP gateway on this address instead of the REPL,
    /// e.g. `127.0.0.1:7432`.
    #[arg(long)]
    listen: Option<String>,
}

fn main() -> ExitCode {
    env_logger::init();
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let engine = Engine::start(DbPath::new(&args.db_path))
        .with_context(|| format!("could not open database at {}", args.db_path.display()))?;

    match args.listen {
        Some(addr) => {
            let runtime = tokio::runtime::Runtime::new().context("could not start async runtime")?;
            runtime
                .block_on(liminaldb_client_api::serve(engine, &addr))
                .with_context(|| format!("could not serve on {addr}"))
        }
        None => repl::run(&engine),
    }
}
