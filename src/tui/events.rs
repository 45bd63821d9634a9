//! Terminal input events forwarded from the blocking input thread.

use crossterm::event::KeyEvent;

#[derive(Debug, Clone)]
pub enum TuiEvent {
    Key(KeyEvent),
    /// Bracketed paste content
    Paste(String),
    Resize,
    /// Input thread gave up (terminal gone)
    Quit,
}
