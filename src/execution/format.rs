//! Display text for execution results and durations.

use std::time::Duration;

use serde_json::Value;

use super::{ExecutionResult, MimeBundle};

/// Render one result as display text. Never fails; may return an empty string.
pub fn format_output(result: &ExecutionResult) -> String {
    match result {
        ExecutionResult::Stream { text, .. } => text.clone(),
        ExecutionResult::Error { ename, evalue, traceback } => {
            let mut out = format!("{ename}: {evalue}");
            for line in traceback {
                out.push('\n');
                out.push_str(line);
            }
            out
        }
        ExecutionResult::ExecuteResult { data, .. } | ExecutionResult::DisplayData { data } => {
            format_bundle(data)
        }
        ExecutionResult::Unknown => String::new(),
    }
}

fn format_bundle(data: &MimeBundle) -> String {
    match data.get("text/plain") {
        Some(Value::String(text)) => text.clone(),
        // nbformat allows multiline strings split into a list of lines
        Some(Value::Array(parts)) => parts.iter().filter_map(Value::as_str).collect(),
        _ if data.is_empty() => String::new(),
        _ => serde_json::to_string_pretty(data).unwrap_or_default(),
    }
}

/// `< 1000` ms renders as whole milliseconds, otherwise seconds truncated to
/// two decimals.
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        let hundredths = ms / 10;
        format!("{}.{:02}s", hundredths / 100, hundredths % 100)
    }
}

pub fn format_elapsed(elapsed: Duration) -> String {
    format_duration(millis(elapsed))
}

/// Whole milliseconds, saturating at `u64::MAX`.
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Remove terminal escape sequences (IPython colours its tracebacks).
pub fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            // CSI: ESC [ params... final byte in @..~
            Some('[') => {
                chars.next();
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            // OSC: ESC ] ... terminated by BEL or ESC \
            Some(']') => {
                chars.next();
                while let Some(c) = chars.next() {
                    if c == '\u{7}' {
                        break;
                    }
                    if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            Some(_) => {
                chars.next();
            }
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle(value: serde_json::Value) -> MimeBundle {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0ms");
        assert_eq!(format_duration(999), "999ms");
        assert_eq!(format_duration(1000), "1.00s");
        assert_eq!(format_duration(1500), "1.50s");
        assert_eq!(format_duration(65000), "65.00s");
    }

    #[test]
    fn test_format_duration_truncates() {
        assert_eq!(format_duration(1999), "1.99s");
        assert_eq!(format_duration(1005), "1.00s");
        assert_eq!(format_elapsed(Duration::from_millis(250)), "250ms");
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_micros(1999)), 1);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_format_stream_text() {
        assert_eq!(format_output(&ExecutionResult::stdout("hello")), "hello");
    }

    #[test]
    fn test_format_error_with_trace() {
        let r = ExecutionResult::Error {
            ename: "ValueError".into(),
            evalue: "bad".into(),
            traceback: vec!["line1".into(), "line2".into()],
        };
        assert_eq!(format_output(&r), "ValueError: bad\nline1\nline2");
    }

    #[test]
    fn test_format_error_without_trace() {
        let r = ExecutionResult::error("ConnectionError", "connection not available");
        assert_eq!(format_output(&r), "ConnectionError: connection not available");
    }

    #[test]
    fn test_format_empty_result() {
        assert_eq!(format_output(&ExecutionResult::Unknown), "");
        let empty = ExecutionResult::DisplayData { data: MimeBundle::new() };
        assert_eq!(format_output(&empty), "");
    }

    #[test]
    fn test_format_rich_data_prefers_plain_text() {
        let r = ExecutionResult::ExecuteResult {
            data: bundle(json!({"text/html": "<b>1</b>", "text/plain": "1"})),
            execution_count: Some(1),
        };
        assert_eq!(format_output(&r), "1");

        let lines = ExecutionResult::DisplayData {
            data: bundle(json!({"text/plain": ["a\n", "b"]})),
        };
        assert_eq!(format_output(&lines), "a\nb");
    }

    #[test]
    fn test_format_rich_data_dumps_bundle() {
        let r = ExecutionResult::DisplayData { data: bundle(json!({"image/png": "iVBOR"})) };
        let text = format_output(&r);
        assert!(text.contains("\"image/png\": \"iVBOR\""), "Got: {text}");
        assert!(text.starts_with('{'));
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\u{1b}[0;31mValueError\u{1b}[0m: bad"), "ValueError: bad");
        assert_eq!(strip_ansi("\u{1b}]8;;http://x\u{7}link"), "link");
        assert_eq!(strip_ansi("plain"), "plain");
    }
}
