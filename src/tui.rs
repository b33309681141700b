use std::io::{self, Stderr};
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{
    DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture, Event,
    EventStream, KeyEvent, KeyEventKind, MouseEvent,
};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use openrouter_chat::ChatError;

pub type Tui = Terminal<CrosstermBackend<Stderr>>;

/// Drives the "Thinking..." animation.
const TICK_RATE: Duration = Duration::from_millis(300);

/// Progress of the reply being streamed in the background.
#[derive(Debug)]
pub enum StreamEvent {
    Token(String),
    Finished(Result<String, ChatError>),
}

#[derive(Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    Mouse(MouseEvent),
    Paste(String),
    Resize(u16, u16),
    Tick,
    Stream(StreamEvent),
}

/// Terminal events the UI cares about. Key releases and repeats are dropped;
/// some terminals report them.
fn translate(event: Event) -> Option<AppEvent> {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => Some(AppEvent::Key(key)),
        Event::Mouse(mouse) => Some(AppEvent::Mouse(mouse)),
        Event::Paste(text) => Some(AppEvent::Paste(text)),
        Event::Resize(w, h) => Some(AppEvent::Resize(w, h)),
        _ => None,
    }
}

/// Single queue for the UI loop. Terminal input and ticks come from one
/// background task; reply streams push through [`EventHandler::sender`].
pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<AppEvent>,
    tx: mpsc::UnboundedSender<AppEvent>,
    shutdown: CancellationToken,
}

impl EventHandler {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        tokio::spawn(read_terminal(tx.clone(), shutdown.clone()));
        Self { rx, tx, shutdown }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<AppEvent> {
        self.tx.clone()
    }

    pub async fn next(&mut self) -> Option<AppEvent> {
        self.rx.recv().await
    }
}

impl Drop for EventHandler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn read_terminal(tx: mpsc::UnboundedSender<AppEvent>, shutdown: CancellationToken) {
    let mut reader = EventStream::new();
    let mut ticks = tokio::time::interval(TICK_RATE);

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticks.tick() => Some(AppEvent::Tick),
            next = reader.next() => match next {
                Some(Ok(event)) => translate(event),
                Some(Err(e)) => {
                    tracing::warn!("Terminal read failed: {}", e);
                    None
                }
                None => break,
            },
        };

        if let Some(event) = event {
            if tx.send(event).is_err() {
                break;
            }
        }
    }
    tracing::debug!("Terminal reader stopped");
}

pub fn init() -> Result<Tui> {
    enable_raw_mode()?;
    execute!(io::stderr(), EnterAlternateScreen, EnableMouseCapture, EnableBracketedPaste)?;
    Ok(Terminal::new(CrosstermBackend::new(io::stderr()))?)
}

pub fn restore() -> Result<()> {
    execute!(io::stderr(), DisableBracketedPaste, DisableMouseCapture, LeaveAlternateScreen)?;
    disable_raw_mode()?;
    Ok(())
}

/// Leave the alternate screen before the panic message is printed.
pub fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = restore();
        previous(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyCode, KeyModifiers};

    #[test]
    fn only_key_presses_reach_the_ui() {
        let press = KeyEvent::new(KeyCode::Char('a'), KeyModifiers::NONE);
        let release = KeyEvent::new_with_kind(KeyCode::Char('a'), KeyModifiers::NONE, KeyEventKind::Release);

        assert!(matches!(translate(Event::Key(press)), Some(AppEvent::Key(_))));
        assert!(translate(Event::Key(release)).is_none());
        assert!(translate(Event::FocusGained).is_none());
    }

    #[test]
    fn paste_and_resize_are_forwarded() {
        assert!(matches!(
            translate(Event::Paste("pasted".to_string())),
            Some(AppEvent::Paste(text)) if text == "pasted"
        ));
        assert!(matches!(translate(Event::Resize(80, 24)), Some(AppEvent::Resize(80, 24))));
    }
}
