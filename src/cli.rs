use std::path::PathBuf;

use clap::{ArgGroup, Parser};

use crate::config::BackendKind;

#[derive(Parser, Debug, Clone)]
#[command(name = "nbplay", about = "Terminal code playground for notebook kernels", version)]
#[command(group(ArgGroup::new("source").args(["file", "code"]).multiple(false)))]
pub struct Cli {
    /// File with code to run. Runs once and exits unless --playground is given.
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Code to run once, printing outputs as they arrive.
    #[arg(short = 'c', long)]
    pub code: Option<String>,

    /// Open the interactive playground (FILE, --code or stdin seed the editor).
    #[arg(short = 'p', long)]
    pub playground: bool,

    /// Execution backend.
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Notebook server base URL for the remote backend.
    #[arg(long)]
    pub url: Option<String>,

    /// Attach to an existing remote kernel instead of creating one.
    #[arg(long = "kernel-id")]
    pub kernel_id: Option<String>,

    /// Kernel spec name used when creating a remote kernel.
    #[arg(long = "kernel-name")]
    pub kernel_name: Option<String>,

    /// Python interpreter for the local backend.
    #[arg(long)]
    pub python: Option<String>,

    /// Refresh interval of the live elapsed-time display, in milliseconds.
    #[arg(long = "tick-ms")]
    pub tick_ms: Option<u64>,

    /// Log file used while the playground owns the terminal.
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Disable coloured output.
    #[arg(long = "no-color")]
    pub no_color: bool,

    /// Verbose logging (debug level).
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_and_code_conflict() {
        assert!(Cli::try_parse_from(["nbplay", "a.py", "--code", "1"]).is_err());
    }

    #[test]
    fn parses_backend_flags() {
        let cli = Cli::try_parse_from(["nbplay", "--backend", "remote", "--kernel-id", "k1", "-p"]).unwrap();
        assert_eq!(cli.backend, Some(BackendKind::Remote));
        assert_eq!(cli.kernel_id.as_deref(), Some("k1"));
        assert!(cli.playground);
    }
}
