//! Layout and rendering for the playground.

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};
use unicode_width::UnicodeWidthChar;

use super::app::PlaygroundApp;
use crate::execution::format::{format_elapsed, format_output, strip_ansi};
use crate::execution::{ExecutionResult, StreamName};
use crate::session::{ConnectionState, SessionState};

const TOOLBAR: [(&str, &str); 6] = [
    ("Run", "Ctrl+R"),
    ("Stop", "Ctrl+X"),
    ("Restart", "Ctrl+T"),
    ("Clear", "Ctrl+L"),
    ("Help", "F1"),
    ("Quit", "Ctrl+C"),
];

pub fn render_ui(frame: &mut Frame, app: &PlaygroundApp) {
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Header
            Constraint::Length(1), // Toolbar
            Constraint::Percentage(45),
            Constraint::Min(3),
            Constraint::Length(1), // Status bar
        ])
        .split(frame.area());

    render_header(frame, app, main_layout[0]);
    render_toolbar(frame, main_layout[1]);
    render_editor(frame, app, main_layout[2]);
    render_outputs(frame, app, main_layout[3]);
    render_status_bar(frame, app, main_layout[4]);

    if app.show_help {
        render_help_overlay(frame);
    }
}

fn connection_style(connection: &ConnectionState) -> Style {
    let color = match connection {
        ConnectionState::Ready => Color::Green,
        ConnectionState::Executing => Color::Yellow,
        ConnectionState::Connecting | ConnectionState::Restarting => Color::Blue,
        ConnectionState::Disconnected => Color::DarkGray,
        ConnectionState::Error(_) => Color::Red,
    };
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

/// Live elapsed time while running, otherwise the last completion time.
pub fn timer_text(state: &SessionState, elapsed: Option<std::time::Duration>) -> Option<String> {
    match state {
        SessionState::Running { .. } => elapsed.map(|e| format!("Running {}", format_elapsed(e))),
        SessionState::Completed { duration } => Some(format!("Completed in {}", format_elapsed(*duration))),
        SessionState::Failed { duration, .. } => Some(format!("Failed after {}", format_elapsed(*duration))),
        SessionState::Idle => None,
    }
}

fn render_header(frame: &mut Frame, app: &PlaygroundApp, area: Rect) {
    let dim = Style::default().fg(Color::DarkGray);
    let connection = app.session.connection();
    let mut spans = vec![
        Span::styled("Notebooks", dim),
        Span::styled(" › ", dim),
        Span::styled("Playground", dim),
        Span::styled(" › ", dim),
        Span::styled(app.backend.clone(), Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::styled(format!("● {}", connection.label()), connection_style(connection)),
    ];
    if let Some(timer) = timer_text(app.session.state(), app.session.elapsed()) {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(timer, Style::default().fg(Color::Cyan)));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_toolbar(frame: &mut Frame, area: Rect) {
    let mut spans = Vec::new();
    for (i, (label, key)) in TOOLBAR.iter().enumerate() {
        if i > 0 {
            spans.push(Span::raw("  "));
        }
        spans.push(Span::styled(*label, Style::default().add_modifier(Modifier::BOLD)));
        spans.push(Span::styled(format!(" {key}"), Style::default().fg(Color::DarkGray)));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_editor(frame: &mut Frame, app: &PlaygroundApp, area: Rect) {
    let visible = area.height.saturating_sub(2) as usize;
    let (row, col) = app.cursor_position();
    let scroll = row.saturating_sub(visible.saturating_sub(1));

    let lines: Vec<Line> = app.code().split('\n').map(|l| Line::from(l.to_string())).collect();
    let editor = Paragraph::new(Text::from(lines))
        .block(Block::default().borders(Borders::ALL).title("Code"))
        .scroll((scroll as u16, 0));
    frame.render_widget(editor, area);

    if !app.show_help && area.width > 2 && area.height > 2 {
        let x = area.x + 1 + (col as u16).min(area.width - 3);
        let y = area.y + 1 + (row - scroll) as u16;
        frame.set_cursor_position((x, y));
    }
}

/// Display lines for one result, styled by kind.
pub fn output_lines(result: &ExecutionResult) -> Vec<Line<'static>> {
    let text = strip_ansi(&format_output(result));
    let style = match result {
        ExecutionResult::Stream { name: StreamName::Stdout, .. } => Style::default(),
        ExecutionResult::Stream { name: StreamName::Stderr, .. } => Style::default().fg(Color::Red),
        ExecutionResult::Error { .. } => Style::default().fg(Color::Red),
        ExecutionResult::ExecuteResult { .. } => Style::default().fg(Color::Cyan),
        ExecutionResult::DisplayData { .. } => Style::default().fg(Color::Magenta),
        ExecutionResult::Unknown => return Vec::new(),
    };
    // streams arrive in chunks; a trailing newline does not start a new line
    let body = text.strip_suffix('\n').unwrap_or(&text);
    if body.is_empty() {
        return Vec::new();
    }
    body.split('\n')
        .enumerate()
        .map(|(i, line)| {
            let style = if i == 0 && result.is_error() { style.add_modifier(Modifier::BOLD) } else { style };
            Line::from(Span::styled(line.to_string(), style))
        })
        .collect()
}

/// Split `line` into rows of at most `width` columns, keeping span styles.
fn wrap_rows(line: Line<'static>, width: usize) -> Vec<Line<'static>> {
    if width == 0 || line.width() <= width {
        return vec![line];
    }
    let mut rows = Vec::new();
    let mut row: Vec<Span<'static>> = Vec::new();
    let mut used = 0;
    for span in line.spans {
        let mut chunk = String::new();
        for c in span.content.chars() {
            let w = c.width().unwrap_or(0);
            if used > 0 && used + w > width {
                if !chunk.is_empty() {
                    row.push(Span::styled(std::mem::take(&mut chunk), span.style));
                }
                rows.push(Line::from(std::mem::take(&mut row)));
                used = 0;
            }
            chunk.push(c);
            used += w;
        }
        if !chunk.is_empty() {
            row.push(Span::styled(chunk, span.style));
        }
    }
    if !row.is_empty() {
        rows.push(Line::from(row));
    }
    rows
}

fn render_outputs(frame: &mut Frame, app: &PlaygroundApp, area: Rect) {
    let outputs = app.session.outputs();
    // rows are wrapped up front so the scroll offset counts what is drawn
    let width = area.width.saturating_sub(2) as usize;
    let content_lines: Vec<Line> = if outputs.is_empty() {
        vec![Line::from(Span::styled(
            "Run code to see output",
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        ))]
    } else {
        outputs
            .iter()
            .flat_map(output_lines)
            .flat_map(|line| wrap_rows(line, width))
            .collect()
    };

    let title = match outputs.len() {
        0 => "Output".to_string(),
        n => format!("Output ({n})"),
    };

    let available_height = area.height.saturating_sub(2) as usize;
    let total_lines = content_lines.len();
    let mut paragraph =
        Paragraph::new(Text::from(content_lines)).block(Block::default().borders(Borders::ALL).title(title));

    if total_lines > available_height {
        let max_scroll = total_lines - available_height;
        let offset = app.output_scroll.min(max_scroll);
        paragraph = paragraph.scroll(((max_scroll - offset) as u16, 0));
    }

    frame.render_widget(paragraph, area);
}

fn render_status_bar(frame: &mut Frame, app: &PlaygroundApp, area: Rect) {
    let mut status = format!("{} | {}", app.status_message, app.session.connection().label());
    if let ConnectionState::Error(message) = app.session.connection() {
        status.push_str(&format!(": {message}"));
    }
    if let Some(kernel) = app.session.kernel_status() {
        status.push_str(&format!(" | kernel {}", format!("{kernel:?}").to_lowercase()));
    }

    let status_paragraph = Paragraph::new(status).style(Style::default().bg(Color::DarkGray).fg(Color::White));
    frame.render_widget(status_paragraph, area);
}

fn render_help_overlay(frame: &mut Frame) {
    let popup_area = centered_rect(70, 70, frame.area());
    frame.render_widget(Clear, popup_area);

    let help_lines = vec![
        Line::from("Playground Help"),
        Line::from(""),
        Line::from("Execution:"),
        Line::from("  Ctrl+R     - Run the code"),
        Line::from("  Ctrl+X     - Interrupt the running code"),
        Line::from("  Ctrl+T     - Restart the kernel"),
        Line::from("  Ctrl+L     - Clear outputs"),
        Line::from(""),
        Line::from("Editing:"),
        Line::from("  Enter      - New line (keeps indentation)"),
        Line::from("  Tab        - Indent"),
        Line::from("  Ctrl+P/N   - Previous/next run code"),
        Line::from("  PgUp/PgDn  - Scroll outputs"),
        Line::from(""),
        Line::from("  F1         - Toggle this help"),
        Line::from("  Ctrl+C x2  - Quit"),
    ];

    let help_paragraph = Paragraph::new(Text::from(help_lines))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Help")
                .title_style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        )
        .wrap(Wrap { trim: true });

    frame.render_widget(help_paragraph, popup_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
