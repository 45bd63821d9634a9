//! Playground handler: interactive editor with live outputs.

use std::io;
use std::sync::Arc;

use anyhow::{bail, Result};
use is_terminal::IsTerminal;

use crate::config::Settings;
use crate::kernel::ExecutionControl;
use crate::tui::run_playground;

pub async fn run(kernel: Arc<dyn ExecutionControl>, code: String, settings: &Settings) -> Result<()> {
    if !io::stdout().is_terminal() {
        eprintln!("Warning: the playground needs an interactive terminal.");
        eprintln!("Pass --code or a FILE to run once without it.");
        bail!("playground requires a terminal");
    }

    run_playground(kernel, code, settings).await
}
