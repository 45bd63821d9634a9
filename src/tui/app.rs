//! Playground state: the execution session plus editor and view state.

use std::time::{Duration, Instant};

use unicode_width::UnicodeWidthStr;

use crate::session::ExecutionSession;

const DOUBLE_CTRL_C_TIMEOUT: Duration = Duration::from_millis(500);
const INDENT: &str = "    ";

pub struct PlaygroundApp {
    pub session: ExecutionSession,
    /// Backend label shown in the header breadcrumb
    pub backend: String,
    /// Cursor position in the code buffer (byte index, always on a char boundary)
    pub cursor: usize,
    /// Lines scrolled up from the bottom of the output pane
    pub output_scroll: usize,
    pub show_help: bool,
    pub status_message: String,
    /// Previously run buffers
    pub history: Vec<String>,
    pub history_index: Option<usize>,
    pub last_ctrl_c_time: Option<Instant>,
}

impl PlaygroundApp {
    pub fn new(session: ExecutionSession, backend: String) -> Self {
        let cursor = session.code().len();
        Self {
            session,
            backend,
            cursor,
            output_scroll: 0,
            show_help: false,
            status_message: "Ctrl+R run | F1 help".to_string(),
            history: Vec::new(),
            history_index: None,
            last_ctrl_c_time: None,
        }
    }

    pub fn code(&self) -> &str {
        self.session.code()
    }

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
    }

    // ----- intents -----

    pub async fn connect(&mut self) {
        match self.session.connect().await {
            Ok(()) => self.set_status("Connected | Ctrl+R run | F1 help"),
            Err(err) => self.set_status(format!("Connection failed: {err}")),
        }
    }

    pub async fn run(&mut self) {
        if self.session.is_executing() {
            self.set_status("Already running | Ctrl+X to stop");
            return;
        }
        let code = self.code().to_string();
        self.push_history(code);
        self.scroll_to_bottom();
        self.session.run_buffer().await;
        self.set_status("Running...");
    }

    pub async fn stop(&mut self) {
        if !self.session.is_executing() {
            self.set_status("Nothing to stop");
            return;
        }
        match self.session.stop().await {
            Ok(()) => self.set_status("Interrupt sent"),
            Err(err) => self.set_status(format!("Interrupt failed: {err}")),
        }
    }

    pub async fn restart(&mut self) {
        self.set_status("Restarting kernel...");
        match self.session.restart().await {
            Ok(()) => self.set_status("Kernel restarted"),
            Err(err) => self.set_status(format!("Restart failed: {err}")),
        }
        self.scroll_to_bottom();
    }

    pub fn clear(&mut self) {
        self.session.clear_outputs();
        self.scroll_to_bottom();
        self.set_status("Outputs cleared");
    }

    pub fn toggle_help(&mut self) {
        self.show_help = !self.show_help;
    }

    /// First press arms, a second press within the timeout quits.
    pub fn handle_ctrl_c(&mut self) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_ctrl_c_time {
            if now.duration_since(last) <= DOUBLE_CTRL_C_TIMEOUT {
                self.last_ctrl_c_time = None;
                return true;
            }
        }
        self.last_ctrl_c_time = Some(now);
        self.set_status("Press Ctrl+C again to quit");
        false
    }

    // ----- output pane -----

    pub fn scroll_up(&mut self, lines: usize) {
        self.output_scroll = self.output_scroll.saturating_add(lines);
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.output_scroll = self.output_scroll.saturating_sub(lines);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.output_scroll = 0;
    }

    // ----- editor -----

    fn line_start(&self) -> usize {
        self.code()[..self.cursor].rfind('\n').map_or(0, |i| i + 1)
    }

    fn line_end(&self) -> usize {
        self.code()[self.cursor..]
            .find('\n')
            .map_or(self.code().len(), |i| self.cursor + i)
    }

    /// Row and display column of the cursor.
    pub fn cursor_position(&self) -> (usize, usize) {
        let before = &self.code()[..self.cursor];
        let row = before.matches('\n').count();
        let col = before[self.line_start()..].width();
        (row, col)
    }

    pub fn insert_char(&mut self, c: char) {
        let cursor = self.cursor;
        self.session.code_mut().insert(cursor, c);
        self.cursor += c.len_utf8();
        self.history_index = None;
    }

    pub fn insert_str(&mut self, text: &str) {
        let text = text.replace("\r\n", "\n").replace('\r', "\n");
        let cursor = self.cursor;
        self.session.code_mut().insert_str(cursor, &text);
        self.cursor += text.len();
        self.history_index = None;
    }

    /// New line keeping the current line's indentation.
    pub fn newline(&mut self) {
        let line = &self.code()[self.line_start()..self.cursor];
        let mut indent: String = line.chars().take_while(|c| *c == ' ' || *c == '\t').collect();
        if line.trim_end().ends_with(':') {
            indent.push_str(INDENT);
        }
        self.insert_str(&format!("\n{indent}"));
    }

    pub fn indent(&mut self) {
        self.insert_str(INDENT);
    }

    pub fn backspace(&mut self) {
        if let Some(c) = self.code()[..self.cursor].chars().next_back() {
            self.cursor -= c.len_utf8();
            let cursor = self.cursor;
            self.session.code_mut().remove(cursor);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.code().len() {
            let cursor = self.cursor;
            self.session.code_mut().remove(cursor);
        }
    }

    pub fn move_cursor_left(&mut self) {
        if let Some(c) = self.code()[..self.cursor].chars().next_back() {
            self.cursor -= c.len_utf8();
        }
    }

    pub fn move_cursor_right(&mut self) {
        if let Some(c) = self.code()[self.cursor..].chars().next() {
            self.cursor += c.len_utf8();
        }
    }

    pub fn move_cursor_home(&mut self) {
        self.cursor = self.line_start();
    }

    pub fn move_cursor_end(&mut self) {
        self.cursor = self.line_end();
    }

    pub fn move_cursor_up(&mut self) {
        let start = self.line_start();
        if start == 0 {
            self.cursor = 0;
            return;
        }
        let column = self.code()[start..self.cursor].chars().count();
        let prev_end = start - 1;
        let prev_start = self.code()[..prev_end].rfind('\n').map_or(0, |i| i + 1);
        self.cursor = offset_in_line(self.code(), prev_start, prev_end, column);
    }

    pub fn move_cursor_down(&mut self) {
        let end = self.line_end();
        if end == self.code().len() {
            self.cursor = end;
            return;
        }
        let column = self.code()[self.line_start()..self.cursor].chars().count();
        let next_start = end + 1;
        let next_end = self.code()[next_start..]
            .find('\n')
            .map_or(self.code().len(), |i| next_start + i);
        self.cursor = offset_in_line(self.code(), next_start, next_end, column);
    }

    fn replace_code(&mut self, code: String) {
        *self.session.code_mut() = code;
        self.cursor = self.code().len();
    }

    // ----- history -----

    pub fn push_history(&mut self, code: String) {
        if !code.trim().is_empty() && self.history.last() != Some(&code) {
            self.history.push(code);
        }
        self.history_index = None;
    }

    pub fn history_prev(&mut self) {
        if self.history.is_empty() {
            return;
        }
        let index = match self.history_index {
            None => self.history.len() - 1,
            Some(i) => i.saturating_sub(1),
        };
        self.history_index = Some(index);
        self.replace_code(self.history[index].clone());
    }

    pub fn history_next(&mut self) {
        match self.history_index {
            Some(i) if i + 1 < self.history.len() => {
                self.history_index = Some(i + 1);
                self.replace_code(self.history[i + 1].clone());
            }
            Some(_) => {
                self.history_index = None;
                self.replace_code(String::new());
            }
            None => {}
        }
    }
}

/// Byte offset of char `column` within `code[start..end]`, clamped to `end`.
fn offset_in_line(code: &str, start: usize, end: usize, column: usize) -> usize {
    code[start..end]
        .char_indices()
        .nth(column)
        .map_or(end, |(i, _)| start + i)
}
