//! Tracing setup. While the playground owns the terminal, log lines go to a
//! file; one-shot runs log to stderr.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ensure_parent;

const NOISY: &str = "hyper=warn,h2=warn,reqwest=warn,rustls=warn,tokio=warn,tungstenite=warn,tokio_tungstenite=warn";

pub fn filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new(format!("debug,{NOISY}"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    }
}

fn open_log_file(path: &Path) -> Result<File> {
    ensure_parent(path)?;
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Install the global subscriber. A second call is ignored.
pub fn init(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let builder = fmt().with_target(false).with_env_filter(filter(verbose));
    let installed = match log_file {
        Some(path) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(open_log_file(path)?))
            .try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}
