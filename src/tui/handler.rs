//! Async event loop for the playground.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{
    self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers,
};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{app::PlaygroundApp, events::TuiEvent, ui::render_ui};
use crate::config::Settings;
use crate::kernel::ExecutionControl;
use crate::session::ExecutionSession;

const PAGE: usize = 10;

/// Open the playground on `kernel`, seeding the editor with `code`.
pub async fn run_playground(kernel: Arc<dyn ExecutionControl>, code: String, settings: &Settings) -> Result<()> {
    let (tick_tx, tick_rx) = mpsc::unbounded_channel();
    let session = ExecutionSession::attach(kernel)
        .with_ticker(settings.tick_interval, tick_tx)
        .with_code(code);
    let label = session.kernel_name();
    let mut app = PlaygroundApp::new(session, label);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    stdout.execute(EnableBracketedPaste)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app, tick_rx).await;

    app.session.shutdown().await;

    // Restore terminal
    disable_raw_mode()?;
    terminal.backend_mut().execute(DisableBracketedPaste)?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn spawn_input_thread(tx: mpsc::UnboundedSender<TuiEvent>) {
    tokio::task::spawn_blocking(move || {
        while !tx.is_closed() {
            match event::poll(Duration::from_millis(100)) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(_) => {
                    let _ = tx.send(TuiEvent::Quit);
                    break;
                }
            }
            let forwarded = match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => TuiEvent::Key(key),
                Ok(Event::Paste(text)) => TuiEvent::Paste(text),
                Ok(Event::Resize(..)) => TuiEvent::Resize,
                Ok(_) => continue,
                Err(_) => TuiEvent::Quit,
            };
            if tx.send(forwarded).is_err() {
                break;
            }
        }
    });
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut PlaygroundApp,
    mut tick_rx: mpsc::UnboundedReceiver<()>,
) -> Result<()> {
    let (input_tx, mut input_rx) = mpsc::unbounded_channel();
    spawn_input_thread(input_tx);

    terminal.draw(|frame| render_ui(frame, app))?;
    app.connect().await;
    app.session.pump();

    let mut events_open = true;
    loop {
        terminal.draw(|frame| render_ui(frame, app))?;

        tokio::select! {
            input = input_rx.recv() => match input {
                Some(TuiEvent::Key(key)) => {
                    if handle_key_event(app, key).await {
                        info!("playground closed");
                        break;
                    }
                }
                Some(TuiEvent::Paste(text)) => app.insert_str(&text),
                Some(TuiEvent::Resize) => {}
                Some(TuiEvent::Quit) | None => break,
            },
            Some(()) = tick_rx.recv() => {}
            event = app.session.next_event(), if events_open => match event {
                Some(event) => {
                    debug!(?event, "kernel event");
                    app.session.handle_event(event);
                    app.session.pump();
                }
                None => events_open = false,
            },
        }
    }

    Ok(())
}

/// Returns true when the playground should close.
async fn handle_key_event(app: &mut PlaygroundApp, key: KeyEvent) -> bool {
    if app.show_help {
        app.show_help = false;
        return false;
    }

    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char('c') if ctrl => return app.handle_ctrl_c(),
        KeyCode::Char('r') if ctrl => app.run().await,
        KeyCode::Char('x') if ctrl => app.stop().await,
        KeyCode::Char('t') if ctrl => app.restart().await,
        KeyCode::Char('l') if ctrl => app.clear(),
        KeyCode::Char('p') if ctrl => app.history_prev(),
        KeyCode::Char('n') if ctrl => app.history_next(),
        KeyCode::F(1) => app.toggle_help(),
        KeyCode::Enter => app.newline(),
        KeyCode::Tab => app.indent(),
        KeyCode::Backspace => app.backspace(),
        KeyCode::Delete => app.delete(),
        KeyCode::Left => app.move_cursor_left(),
        KeyCode::Right => app.move_cursor_right(),
        KeyCode::Up => app.move_cursor_up(),
        KeyCode::Down => app.move_cursor_down(),
        KeyCode::Home => app.move_cursor_home(),
        KeyCode::End => app.move_cursor_end(),
        KeyCode::PageUp => app.scroll_up(PAGE),
        KeyCode::PageDown => app.scroll_down(PAGE),
        KeyCode::Char(c) if !ctrl => app.insert_char(c),
        _ => {}
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::fake::{Call, FakeKernel};

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    fn ctrl(c: char) -> KeyEvent {
        key(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    #[tokio::test]
    async fn test_toolbar_shortcuts_reach_the_kernel() {
        let fake = FakeKernel::connected();
        let mut app = PlaygroundApp::new(ExecutionSession::attach(fake.clone()), "fake".into());
        for c in "1+1".chars() {
            handle_key_event(&mut app, key(KeyCode::Char(c), KeyModifiers::NONE)).await;
        }
        handle_key_event(&mut app, ctrl('r')).await;
        handle_key_event(&mut app, ctrl('t')).await;
        assert_eq!(
            fake.calls(),
            vec![
                Call::Execute { session_id: crate::session::SESSION_ID.into(), code: "1+1".into() },
                Call::Restart,
            ]
        );
    }

    #[tokio::test]
    async fn test_help_swallows_next_key() {
        let fake = FakeKernel::connected();
        let mut app = PlaygroundApp::new(ExecutionSession::attach(fake.clone()), "fake".into());
        handle_key_event(&mut app, key(KeyCode::F(1), KeyModifiers::NONE)).await;
        assert!(app.show_help);
        handle_key_event(&mut app, key(KeyCode::Char('a'), KeyModifiers::NONE)).await;
        assert!(!app.show_help);
        assert_eq!(app.code(), "");
    }

    #[tokio::test]
    async fn test_ctrl_c_twice_quits() {
        let mut app = PlaygroundApp::new(ExecutionSession::attach(FakeKernel::connected()), "fake".into());
        assert!(!handle_key_event(&mut app, ctrl('c')).await);
        assert!(handle_key_event(&mut app, ctrl('c')).await);
    }

    #[tokio::test]
    async fn test_shift_letters_are_typed() {
        let mut app = PlaygroundApp::new(ExecutionSession::attach(FakeKernel::connected()), "fake".into());
        handle_key_event(&mut app, key(KeyCode::Char('A'), KeyModifiers::SHIFT)).await;
        handle_key_event(&mut app, key(KeyCode::Enter, KeyModifiers::NONE)).await;
        assert_eq!(app.code(), "A\n");
    }
}
