mod app;
mod hook;
mod state;
mod sync;

use crate::app::cli::*;
use crate::app::render::Renderer;
use crate::app::shell::Shell;
use crate::hook::run::*;
use crate::state::query::*;
use crate::sync::store::{SqliteStore, Store};
use clap::Parser;
use std::sync::Arc;
use tokio::io::{stdin, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout carries only command output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let program = Program::parse();
    let program_config = ProgramConfig::load().unwrap_or_default();

    // Create the hook runner unless --no-hooks was passed.
    let runner = if program.no_hooks {
        None
    } else {
        Some(Runner::try_new()?)
    };

    // --in-memory uses an ephemeral SQLite database that vanishes when the
    // process exits.
    let database = if program.in_memory {
        Database::open_in_memory()?
    } else {
        Database::open()?
    };
    database.migrate()?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(database));

    let mut seed = program_config.seed();
    if let Some(uid) = program.user {
        seed.profile.uid = uid;
    }

    let renderer = Renderer::new(program.output, &program_config);
    let options = program_config.interpreter_options();
    let mut shell = Shell::start(store, seed, runner, options, renderer).await?;

    match program.command.unwrap_or(ProgramCommand::Shell) {
        ProgramCommand::Shell => shell.run(BufReader::new(stdin())).await?,
        ProgramCommand::Exec(args) => {
            let script = args.lines.join("\n");
            shell.run(script.as_bytes()).await?
        }
    }

    Ok(())
}
