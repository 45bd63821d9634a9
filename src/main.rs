mod cli;
mod config;
mod execution;
mod handlers;
mod kernel;
mod logging;
mod printer;
mod process;
mod session;
mod tui;

use std::io::{self, Read};

use anyhow::{Context, Result};
use config::{Config, Settings};
use is_terminal::IsTerminal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    // Load config; CLI flags override it
    let cfg = Config::load();
    let settings = Settings::resolve(&args, &cfg)?;

    // Code from --code, FILE, or piped stdin
    let stdin_is_tty = io::stdin().is_terminal();
    let code = if let Some(code) = &args.code {
        Some(code.clone())
    } else if let Some(path) = &args.file {
        Some(std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?)
    } else if !stdin_is_tty {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        Some(buf)
    } else {
        None
    };

    let interactive = args.playground || code.is_none();
    logging::init(args.verbose, interactive.then_some(settings.log_file.as_path()))?;
    info!(config = %cfg.config_path.display(), backend = ?settings.backend, interactive, "starting");

    let kernel = kernel::from_settings(&settings)?;
    match code {
        Some(code) if !interactive => handlers::run::run(kernel, &code, &settings).await,
        code => handlers::playground::run(kernel, code.unwrap_or_default(), &settings).await,
    }
}
