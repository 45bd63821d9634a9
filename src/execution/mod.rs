//! Execution results produced by a kernel, one record per unit of output.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod format;

/// Rich output keyed by mime type (`text/plain`, `text/html`, `image/png`, ...).
pub type MimeBundle = Map<String, Value>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    #[default]
    Stdout,
    Stderr,
}

/// One unit of kernel output. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// Plain text written to stdout or stderr.
    Stream {
        #[serde(default)]
        name: StreamName,
        #[serde(default)]
        text: String,
    },
    /// Value of the last expression in a cell.
    ExecuteResult {
        #[serde(default)]
        data: MimeBundle,
        #[serde(default)]
        execution_count: Option<u32>,
    },
    /// Rich data published explicitly (plots, tables, html).
    DisplayData {
        #[serde(default)]
        data: MimeBundle,
    },
    /// Raised exception with its trace lines in order.
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
    /// Any output kind this client does not understand.
    #[serde(other)]
    Unknown,
}

impl ExecutionResult {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self::Stream { name: StreamName::Stdout, text: text.into() }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self::Stream { name: StreamName::Stderr, text: text.into() }
    }

    /// Error result with an empty trace, used for locally synthesized failures.
    pub fn error(ename: impl Into<String>, evalue: impl Into<String>) -> Self {
        Self::Error { ename: ename.into(), evalue: evalue.into(), traceback: Vec::new() }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Short label used by the output pane and printer.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stream { name: StreamName::Stdout, .. } => "stdout",
            Self::Stream { name: StreamName::Stderr, .. } => "stderr",
            Self::ExecuteResult { .. } => "result",
            Self::DisplayData { .. } => "display",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }
}
