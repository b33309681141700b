use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use openrouter_chat::models::{self, CATALOG};
use openrouter_chat::render;
use openrouter_chat::{
    Backend, BubbleState, ChatError, ChatMessage, ChatRole, FileStore, KeyValueStore,
    MessageBubble, SessionStore, TokenSink,
};

use crate::tui::{AppEvent, StreamEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

/// Forwards decoded tokens to the UI loop.
struct ChannelSink {
    tx: UnboundedSender<AppEvent>,
}

impl TokenSink for ChannelSink {
    fn on_token(&mut self, token: &str, _accumulated: &str) {
        let _ = self.tx.send(AppEvent::Stream(StreamEvent::Token(token.to_string())));
    }
}

pub struct App<S: KeyValueStore = FileStore> {
    pub should_quit: bool,
    pub input_mode: InputMode,

    pub store: SessionStore<S>,
    backend: Option<Backend>,
    backend_error: Option<String>,
    pub selected_model: String,

    // Input line
    pub input: String,
    pub cursor: usize,

    // Reply in flight (or the last one that stopped or failed)
    pub bubble: MessageBubble,
    cancel: Option<CancellationToken>,
    pending_session: Option<String>,
    events: UnboundedSender<AppEvent>,

    // Chat pane
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,
    pub follow_bottom: bool,
    pub animation_frame: u8,

    // Session sidebar
    pub sidebar_state: ListState,

    // Popups
    pub show_model_picker: bool,
    pub model_picker_state: ListState,
    pub notice: Option<String>,

    /// One-line feedback in the footer, cleared on the next key.
    pub status: Option<String>,

    // Panel areas for mouse hit-testing (updated during render)
    pub sidebar_area: Option<Rect>,
    pub chat_area: Option<Rect>,
}

impl<S: KeyValueStore> App<S> {
    /// `backend` is an error when no credential is available; the message is
    /// shown once at startup and again on any attempt to send.
    pub fn new(
        store: SessionStore<S>,
        backend: Result<Backend, ChatError>,
        model: Option<String>,
        events: UnboundedSender<AppEvent>,
    ) -> Self {
        let (backend, backend_error) = match backend {
            Ok(backend) => (Some(backend), None),
            Err(e) => (None, Some(e.to_string())),
        };

        let selected_model = model
            .or_else(|| store.selected_model())
            .unwrap_or_else(|| models::DEFAULT_MODEL.to_string());

        let mut app = Self {
            should_quit: false,
            input_mode: InputMode::Editing,

            store,
            backend,
            notice: backend_error.clone(),
            backend_error,
            selected_model,

            input: String::new(),
            cursor: 0,

            bubble: MessageBubble::new(),
            cancel: None,
            pending_session: None,
            events,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            follow_bottom: true,
            animation_frame: 0,

            sidebar_state: ListState::default(),

            show_model_picker: false,
            model_picker_state: ListState::default(),

            status: None,

            sidebar_area: None,
            chat_area: None,
        };
        app.sync_sidebar();
        app
    }

    pub fn backend_label(&self) -> String {
        match &self.backend {
            Some(backend) => backend.describe(),
            None => "not configured".to_string(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.cancel.is_some()
    }

    /// Point the sidebar cursor at the active session.
    fn sync_sidebar(&mut self) {
        let active = self.store.active_id();
        let index = self.store.list_sessions().iter().position(|s| s.id == active);
        self.sidebar_state.select(index.or(Some(0)));
    }

    fn reset_view(&mut self) {
        self.bubble = MessageBubble::new();
        self.chat_scroll = 0;
        self.follow_bottom = true;
        self.sync_sidebar();
    }

    fn refuse_while_streaming(&mut self) -> bool {
        if self.is_streaming() {
            self.status = Some("Stop the current reply first (s)".to_string());
            return true;
        }
        false
    }

    // Sending

    pub fn submit(&mut self) {
        let text = self.input.trim().to_string();
        if text.is_empty() {
            return;
        }
        if self.is_streaming() {
            self.status = Some("Wait for the reply to finish or press s to stop".to_string());
            return;
        }

        let session_id = self.store.active_id().to_string();
        if let Err(e) = self.store.append_message(&session_id, ChatMessage::user(text)) {
            tracing::warn!("Failed to save message: {:#}", e);
        }

        self.input.clear();
        self.cursor = 0;
        self.input_mode = InputMode::Normal;
        self.follow_bottom = true;

        self.bubble = MessageBubble::new();
        let Some(backend) = self.backend.clone() else {
            let message = self
                .backend_error
                .clone()
                .unwrap_or_else(|| "No backend configured".to_string());
            self.bubble.fail(message);
            return;
        };
        self.bubble.start();

        let context = self.store.context_window().to_vec();
        let model = self.selected_model.clone();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let tx = self.events.clone();

        tokio::spawn(async move {
            let mut sink = ChannelSink { tx: tx.clone() };
            let result = backend
                .stream_reply(&model, &context, &mut sink, &task_cancel)
                .await;
            let _ = tx.send(AppEvent::Stream(StreamEvent::Finished(result)));
        });

        self.cancel = Some(cancel);
        self.pending_session = Some(session_id);
    }

    pub fn stop(&mut self) {
        if let Some(cancel) = &self.cancel {
            tracing::debug!("Stop requested");
            cancel.cancel();
        }
    }

    pub fn on_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Token(token) => self.bubble.push_token(&token),
            StreamEvent::Finished(result) => {
                self.cancel = None;
                let session_id = self.pending_session.take();

                match result {
                    Ok(text) => {
                        self.bubble.complete();
                        if text.is_empty() {
                            tracing::info!("Empty reply, not saved");
                        } else if let Some(id) = session_id {
                            if let Err(e) = self.store.append_message(&id, ChatMessage::assistant(text)) {
                                tracing::warn!("Failed to save reply: {:#}", e);
                            }
                            // The saved reply is drawn from history from now on.
                            self.bubble = MessageBubble::new();
                            self.sync_sidebar();
                        }
                    }
                    Err(e) if e.is_cancelled() => self.bubble.stop(),
                    Err(e) => self.bubble.fail(e.to_string()),
                }
            }
        }
    }

    /// Text the copy action puts on the clipboard: the last reply shown.
    pub fn copy_text(&self) -> Option<String> {
        if self.bubble.state() != BubbleState::Idle && !self.bubble.text().is_empty() {
            return Some(self.bubble.text().to_string());
        }
        self.store
            .active_session()?
            .messages()
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::Assistant)
            .map(|m| m.content.clone())
    }

    /// The same reply with the markdown syntax removed.
    pub fn copy_plain_text(&self) -> Option<String> {
        self.copy_text().map(|text| render::plain_text(&text))
    }

    // Sessions

    pub fn new_session(&mut self) {
        if self.refuse_while_streaming() {
            return;
        }
        if let Err(e) = self.store.create_session() {
            tracing::warn!("Failed to save new session: {:#}", e);
        }
        self.reset_view();
        self.input_mode = InputMode::Editing;
    }

    pub fn start_temporary(&mut self) {
        if self.refuse_while_streaming() {
            return;
        }
        self.store.start_temporary();
        self.reset_view();
        self.status = Some("Temporary chat: nothing will be saved".to_string());
        self.input_mode = InputMode::Editing;
    }

    pub fn open_selected_session(&mut self) {
        if self.refuse_while_streaming() {
            return;
        }
        let Some(id) = self.selected_session_id() else { return };
        if self.store.select_session(&id) {
            self.reset_view();
        }
    }

    pub fn delete_selected_session(&mut self) {
        if self.refuse_while_streaming() {
            return;
        }
        let Some(id) = self.selected_session_id() else { return };
        let was_active = !self.store.is_temporary() && self.store.active_id() == id;
        if let Err(e) = self.store.delete_session(&id) {
            tracing::warn!("Failed to delete session: {:#}", e);
        }
        if was_active {
            self.reset_view();
        } else {
            let len = self.store.list_sessions().len();
            let i = self.sidebar_state.selected().unwrap_or(0);
            self.sidebar_state.select(Some(i.min(len.saturating_sub(1))));
        }
    }

    fn selected_session_id(&self) -> Option<String> {
        self.sidebar_state
            .selected()
            .and_then(|i| self.store.list_sessions().get(i))
            .map(|s| s.id.clone())
    }

    pub fn sidebar_down(&mut self) {
        let len = self.store.list_sessions().len();
        if len > 0 {
            let i = self.sidebar_state.selected().unwrap_or(0);
            self.sidebar_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn sidebar_up(&mut self) {
        let i = self.sidebar_state.selected().unwrap_or(0);
        self.sidebar_state.select(Some(i.saturating_sub(1)));
    }

    // Chat scrolling

    pub fn scroll_up(&mut self, lines: u16) {
        self.follow_bottom = false;
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines);
    }

    pub fn scroll_to_top(&mut self) {
        self.follow_bottom = false;
        self.chat_scroll = 0;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.follow_bottom = true;
    }

    /// Clamp the scroll offset once the chat height is known. Reaching the end
    /// turns following back on.
    pub fn clamp_scroll(&mut self, total_lines: u16) {
        let max = total_lines.saturating_sub(self.chat_height);
        if self.follow_bottom || self.chat_scroll >= max {
            self.chat_scroll = max;
            self.follow_bottom = true;
        }
    }

    pub fn tick_animation(&mut self) {
        if self.bubble.is_waiting() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    // Model picker

    /// Catalog ids, plus the current model when it came from elsewhere.
    pub fn model_choices(&self) -> Vec<String> {
        let mut choices: Vec<String> = CATALOG.iter().map(|entry| entry.id.to_string()).collect();
        if !choices.contains(&self.selected_model) {
            choices.push(self.selected_model.clone());
        }
        choices
    }

    pub fn open_model_picker(&mut self) {
        let current = self
            .model_choices()
            .iter()
            .position(|id| *id == self.selected_model);
        self.model_picker_state.select(current.or(Some(0)));
        self.show_model_picker = true;
    }

    pub fn model_picker_nav_down(&mut self) {
        let len = self.model_choices().len();
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some((i + 1).min(len.saturating_sub(1))));
    }

    pub fn model_picker_nav_up(&mut self) {
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some(i.saturating_sub(1)));
    }

    pub fn select_model(&mut self) {
        let choices = self.model_choices();
        if let Some(model) = self.model_picker_state.selected().and_then(|i| choices.get(i)) {
            self.selected_model = model.clone();
            if let Err(e) = self.store.set_selected_model(model) {
                tracing::warn!("Failed to save selected model: {:#}", e);
            }
            tracing::info!("Model set to {}", model);
        }
        self.show_model_picker = false;
    }

    pub fn quit(&mut self) {
        self.stop();
        self.should_quit = true;
    }
}
