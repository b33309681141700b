use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};

use openrouter_chat::models;
use openrouter_chat::render::{render_markdown, sanitize};
use openrouter_chat::{BubbleState, ChatRole, KeyValueStore};

use crate::app::{App, InputMode};

const SIDEBAR_WIDTH: u16 = 28;

pub fn render<S: KeyValueStore>(app: &mut App<S>, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    let [sidebar_area, main_area] = Layout::horizontal([
        Constraint::Length(SIDEBAR_WIDTH.min(body_area.width / 3)),
        Constraint::Min(0),
    ])
    .areas(body_area);

    let [chat_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .areas(main_area);

    app.sidebar_area = Some(sidebar_area);
    app.chat_area = Some(chat_area);

    render_header(app, frame, header_area);
    render_sidebar(app, frame, sidebar_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    if let Some(notice) = &app.notice {
        render_notice(notice, frame, area);
    } else if app.show_model_picker {
        render_model_picker(app, frame, area);
    }
}

fn render_header<S: KeyValueStore>(app: &App<S>, frame: &mut Frame, area: Rect) {
    let mut spans = vec![
        Span::styled(" OpenRouter Chat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!("{} ", models::display_name(&app.selected_model)),
            Style::default().fg(Color::Green),
        ),
        Span::styled(format!("via {} ", app.backend_label()), Style::default().fg(Color::DarkGray)),
    ];
    if app.store.is_temporary() {
        spans.push(Span::styled(
            " TEMPORARY ",
            Style::default().bg(Color::Magenta).fg(Color::White),
        ));
        spans.push(Span::raw(" "));
    }
    spans.push(Span::styled(
        format!("v{}", env!("CARGO_PKG_VERSION")),
        Style::default().fg(Color::DarkGray),
    ));

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_footer<S: KeyValueStore>(app: &App<S>, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = match app.input_mode {
        InputMode::Normal => (" NORMAL ", Style::default().bg(Color::Blue).fg(Color::White)),
        InputMode::Editing => (" INSERT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let pairs: Vec<(&str, &str)> = if app.show_model_picker {
        vec![("j/k", "move"), ("Enter", "select"), ("Esc", "cancel")]
    } else {
        match app.input_mode {
            InputMode::Editing => vec![("Enter", "send"), ("Esc", "commands"), ("PgUp/PgDn", "scroll")],
            InputMode::Normal if app.is_streaming() => {
                vec![("s", "stop"), ("PgUp/PgDn", "scroll"), ("q", "quit")]
            }
            InputMode::Normal => vec![
                ("i", "type"),
                ("j/k", "sessions"),
                ("Enter", "open"),
                ("n", "new"),
                ("t", "temporary"),
                ("x", "delete"),
                ("m", "model"),
                ("y/Y", "copy md/text"),
                ("q", "quit"),
            ],
        }
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];
    for (key, label) in pairs {
        spans.push(Span::styled(format!(" {} ", key), key_style));
        spans.push(Span::styled(format!(" {} ", label), label_style));
    }
    if let Some(status) = &app.status {
        spans.push(Span::styled(format!("  {}", status), Style::default().fg(Color::Yellow)));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_sidebar<S: KeyValueStore>(app: &mut App<S>, frame: &mut Frame, area: Rect) {
    let active_id = app.store.active_id().to_string();
    let temporary = app.store.is_temporary();

    let items: Vec<ListItem> = app
        .store
        .list_sessions()
        .iter()
        .map(|session| {
            let style = if !temporary && session.id == active_id {
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {} ", sanitize(&session.title))).style(style)
        })
        .collect();

    let border_color = if app.input_mode == InputMode::Normal {
        Color::Cyan
    } else {
        Color::DarkGray
    };

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border_color))
                .title(" Chats "),
        )
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, area, &mut app.sidebar_state);
}

fn role_line(role: ChatRole) -> Line<'static> {
    match role {
        ChatRole::User => Line::from(Span::styled(
            "You:",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        ChatRole::Assistant => Line::from(Span::styled(
            "AI:",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
    }
}

const COPY_KEYS: &[(&str, &str)] = &[("y", "copy"), ("Y", "copy text")];

fn toolbar_line(keys: &[(&str, &str)]) -> Line<'static> {
    let mut spans = Vec::new();
    for (key, label) in keys {
        spans.push(Span::styled(format!("[{}]", key), Style::default().fg(Color::DarkGray).bold()));
        spans.push(Span::styled(format!(" {}  ", label), Style::default().fg(Color::DarkGray)));
    }
    Line::from(spans)
}

/// Every line of the conversation, then the reply in flight.
fn chat_lines<S: KeyValueStore>(app: &App<S>) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = Vec::new();
    let messages = app
        .store
        .active_session()
        .map(|s| s.messages())
        .unwrap_or_default();

    for msg in messages {
        lines.push(role_line(msg.role));
        match msg.role {
            ChatRole::User => {
                for line in sanitize(&msg.content).lines() {
                    lines.push(Line::from(line.to_string()));
                }
            }
            ChatRole::Assistant => lines.extend(render_markdown(&msg.content)),
        }
        lines.push(Line::default());
    }

    match app.bubble.state() {
        BubbleState::Idle => {
            if messages.last().is_some_and(|m| m.role == ChatRole::Assistant) {
                // Hint sits under the last reply.
                lines.pop();
                lines.push(toolbar_line(COPY_KEYS));
                lines.push(Line::default());
            }
        }
        state => {
            lines.push(role_line(ChatRole::Assistant));
            if app.bubble.is_waiting() {
                let dots = ".".repeat((app.animation_frame as usize) + 1);
                lines.push(Line::from(Span::styled(
                    format!("Thinking{}", dots),
                    Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                )));
            } else if state == BubbleState::Completed && app.bubble.text().is_empty() {
                lines.push(Line::from(Span::styled(
                    "(empty reply)",
                    Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                )));
            } else {
                lines.extend(app.bubble.lines());
                if state == BubbleState::Streaming {
                    lines.push(Line::from(Span::styled("▌", Style::default().fg(Color::DarkGray))));
                }
            }
            if app.bubble.stop_enabled() {
                lines.push(toolbar_line(&[("s", "stop")]));
            } else if app.bubble.toolbar_visible() {
                lines.push(toolbar_line(COPY_KEYS));
            }
        }
    }

    lines
}

/// Rows `lines` occupy once wrapped to `width`.
fn wrapped_height(lines: &[Line<'_>], width: u16) -> u16 {
    let width = usize::from(width.max(1));
    let rows: usize = lines
        .iter()
        .map(|line| line.width().max(1).div_ceil(width))
        .sum();
    u16::try_from(rows).unwrap_or(u16::MAX)
}

fn render_chat<S: KeyValueStore>(app: &mut App<S>, frame: &mut Frame, area: Rect) {
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let title = match app.store.active_session() {
        Some(session) => format!(" {} ", sanitize(&session.title)),
        None => " Chat ".to_string(),
    };
    let border_color = if app.is_streaming() { Color::Yellow } else { Color::DarkGray };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    let lines = chat_lines(app);
    if lines.is_empty() {
        let placeholder = Paragraph::new("Ask anything. Press i to type, m to pick a model.")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(placeholder, area);
        return;
    }

    let total = wrapped_height(&lines, app.chat_width);
    app.clamp_scroll(total);

    let chat = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input<S: KeyValueStore>(app: &App<S>, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if editing { Color::Yellow } else { Color::DarkGray };
    let title = if app.is_streaming() {
        " Message (reply in progress) "
    } else {
        " Message "
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Horizontal scroll keeps the cursor visible
    let inner_width = area.width.saturating_sub(2) as usize;
    let scroll_offset = if inner_width > 0 && app.cursor >= inner_width {
        app.cursor - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app
        .input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(block);
    frame.render_widget(input, area);

    if editing && app.notice.is_none() && !app.show_model_picker {
        let cursor_x = (app.cursor - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height.saturating_sub(4));
    Rect::new(
        area.x + (area.width.saturating_sub(width)) / 2,
        area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height,
    )
}

fn render_model_picker<S: KeyValueStore>(app: &mut App<S>, frame: &mut Frame, area: Rect) {
    let choices = app.model_choices();
    let popup_area = centered(area, 52, choices.len() as u16 + 2);
    frame.render_widget(Clear, popup_area);

    let items: Vec<ListItem> = choices
        .iter()
        .map(|id| {
            let style = if *id == app.selected_model {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {} ", models::display_name(id))).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan))
                .title(" Select Model (Enter to select, Esc to cancel) "),
        )
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup_area, &mut app.model_picker_state);
}

fn render_notice(notice: &str, frame: &mut Frame, area: Rect) {
    let popup_area = centered(area, 60, 7);
    frame.render_widget(Clear, popup_area);

    let text = Text::from(vec![
        Line::from(Span::styled(notice.to_string(), Style::default().fg(Color::Red))),
        Line::default(),
        Line::from(Span::styled(
            "Put your key in APIKEY.txt or OPENROUTER_API_KEY, or start with --relay. Press any key.",
            Style::default().fg(Color::DarkGray),
        )),
    ]);

    let popup = Paragraph::new(text)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Red))
                .title(" Configuration "),
        );
    frame.render_widget(popup, popup_area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use openrouter_chat::{ChatError, MemoryStore, SessionStore};
    use ratatui::{backend::TestBackend, Terminal};
    use tokio::sync::mpsc;

    use crate::tui::StreamEvent;

    fn app() -> App<MemoryStore> {
        let store = SessionStore::load(MemoryStore::new()).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        App::new(store, Err(ChatError::config("API key not found")), None, tx)
    }

    fn plain(lines: &[Line<'_>]) -> Vec<String> {
        lines
            .iter()
            .map(|l| l.spans.iter().map(|s| s.content.as_ref()).collect())
            .collect()
    }

    fn screen(app: &mut App<MemoryStore>) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        terminal.draw(|frame| render(app, frame)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        buffer
            .content()
            .chunks(buffer.area.width as usize)
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn wrapped_height_counts_wrapped_rows() {
        let lines = vec![Line::from("a".repeat(25)), Line::default(), Line::from("short")];
        assert_eq!(wrapped_height(&lines, 10), 3 + 1 + 1);
        assert_eq!(wrapped_height(&lines, 0), 25 + 1 + 5);
    }

    #[test]
    fn errored_reply_shows_under_the_question() {
        let mut app = app();
        app.notice = None;
        app.input = "hello".to_string();
        app.submit();

        let text = plain(&chat_lines(&app));
        assert_eq!(text[0], "You:");
        assert_eq!(text[1], "hello");
        assert_eq!(text[3], "AI:");
        assert!(text[4].starts_with("Error: "));
        assert!(text[4].contains("API key not found"));
        assert_eq!(text[5], "[y] copy  [Y] copy text  ");
    }

    #[test]
    fn history_gets_copy_hint_under_last_reply() {
        let mut app = app();
        let id = app.store.active_id().to_string();
        app.store.append_message(&id, openrouter_chat::ChatMessage::user("q")).unwrap();
        app.store.append_message(&id, openrouter_chat::ChatMessage::assistant("**a**")).unwrap();

        let text = plain(&chat_lines(&app));
        assert_eq!(text, vec!["You:", "q", "", "AI:", "a", "[y] copy  [Y] copy text  ", ""]);
    }

    #[test]
    fn empty_completed_reply_is_marked() {
        let mut app = app();
        app.bubble.start();
        app.on_stream_event(StreamEvent::Finished(Ok(String::new())));
        let text = plain(&chat_lines(&app));
        assert!(text.contains(&"(empty reply)".to_string()));
    }

    #[test]
    fn startup_notice_is_drawn() {
        let mut app = app();
        let screen = screen(&mut app);
        assert!(screen.contains("Configuration"));
        assert!(screen.contains("API key not found"));
    }

    #[test]
    fn model_picker_lists_catalog_names() {
        let mut app = app();
        app.notice = None;
        app.open_model_picker();
        let screen = screen(&mut app);
        assert!(screen.contains("OpenRouter: Auto (Free)"));
        assert!(screen.contains("Aurora Alpha"));
    }
}
