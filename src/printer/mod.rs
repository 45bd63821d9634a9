//! Printers for one-shot runs: outputs as they arrive, then the timing line.

use std::io::{self, Write};

use owo_colors::OwoColorize;

use crate::execution::format::{format_duration, format_output};
use crate::execution::{ExecutionResult, StreamName};

pub struct OutputPrinter {
    /// Colour for execution results; `None` prints plain text.
    pub color: Option<String>,
}

impl OutputPrinter {
    pub fn new(color: &str, use_color: bool) -> Self {
        Self { color: use_color.then(|| color.to_string()) }
    }

    fn paint(&self, text: &str) -> String {
        match self.color.as_deref() {
            Some("green") => text.green().to_string(),
            Some("cyan") => text.cyan().to_string(),
            Some("magenta") => text.magenta().to_string(),
            Some("yellow") => text.yellow().to_string(),
            Some("blue") => text.blue().to_string(),
            _ => text.to_string(),
        }
    }

    fn red(&self, text: &str) -> String {
        if self.color.is_some() {
            text.red().to_string()
        } else {
            text.to_string()
        }
    }

    /// Render one output the way it is written to the terminal. Streams are
    /// passed through untouched, everything else gets its own line.
    pub fn render(&self, result: &ExecutionResult) -> String {
        let text = format_output(result);
        match result {
            ExecutionResult::Stream { name: StreamName::Stdout, .. } => text,
            ExecutionResult::Stream { name: StreamName::Stderr, .. } => self.red(&text),
            ExecutionResult::Error { .. } => format!("{}\n", self.red(&text)),
            _ if text.is_empty() => String::new(),
            _ => format!("{}\n", self.paint(&text)),
        }
    }

    pub fn print(&self, result: &ExecutionResult) {
        let rendered = self.render(result);
        let is_stderr = matches!(
            result,
            ExecutionResult::Stream { name: StreamName::Stderr, .. } | ExecutionResult::Error { .. }
        );
        if is_stderr {
            eprint!("{rendered}");
        } else {
            print!("{rendered}");
            let _ = io::stdout().flush();
        }
    }

    pub fn print_duration(&self, ms: u64, failed: bool) {
        let line = format!("{} in {}", if failed { "failed" } else { "completed" }, format_duration(ms));
        if self.color.is_some() {
            eprintln!("{}", line.dimmed());
        } else {
            eprintln!("{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plain() -> OutputPrinter {
        OutputPrinter::new("cyan", false)
    }

    #[test]
    fn test_streams_pass_through() {
        assert_eq!(plain().render(&ExecutionResult::stdout("a\nb")), "a\nb");
        assert_eq!(plain().render(&ExecutionResult::stderr("warn\n")), "warn\n");
    }

    #[test]
    fn test_results_get_a_line() {
        let data = json!({"text/plain": "42"}).as_object().cloned().unwrap();
        let result = ExecutionResult::ExecuteResult { data, execution_count: Some(1) };
        assert_eq!(plain().render(&result), "42\n");
        assert_eq!(plain().render(&ExecutionResult::error("ValueError", "bad")), "ValueError: bad\n");
    }

    #[test]
    fn test_empty_outputs_print_nothing() {
        let result = ExecutionResult::DisplayData { data: Default::default() };
        assert_eq!(plain().render(&result), "");
        assert_eq!(plain().render(&ExecutionResult::Unknown), "");
    }

    #[test]
    fn test_color_only_when_enabled() {
        assert!(OutputPrinter::new("cyan", false).color.is_none());
        let colored = OutputPrinter::new("green", true);
        assert_eq!(colored.color.as_deref(), Some("green"));
        assert!(colored.render(&ExecutionResult::stderr("x")).contains("\u{1b}["));
    }
}
