//! Terminal rendering of assistant replies.
//!
//! [`render_markdown`] turns the *whole* accumulated reply into styled lines;
//! [`MessageBubble`] calls it again on every token so that code fences and
//! lists look right as soon as they close.

use std::borrow::Cow;
use std::sync::LazyLock;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use regex::Regex;

use crate::stream::TokenSink;

pub const STOPPED_ANNOTATION: &str = "[Generation stopped]";

static ESCAPE_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-_]").unwrap()
});

static SLASH_CODE_TOKEN: LazyLock<Regex> = LazyLock::new(|| code_token_regex("//.*$"));
static HASH_CODE_TOKEN: LazyLock<Regex> = LazyLock::new(|| code_token_regex("#.*$"));

const KEYWORDS: &str = "as|async|await|break|class|const|continue|def|default|do|elif|else|enum|export|extends|false|fn|for|from|func|function|if|impl|import|in|interface|let|loop|match|mod|mut|new|None|null|package|pub|return|self|static|struct|switch|this|throw|trait|True|true|False|try|type|use|var|while|with|yield";

fn code_token_regex(comment: &str) -> Regex {
    Regex::new(&format!(
        r#"(?P<comment>{comment})|(?P<string>"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*')|(?P<number>\b\d+(?:\.\d+)?\b)|(?P<keyword>\b(?:{KEYWORDS})\b)"#
    ))
    .unwrap()
}

/// Strip terminal escape sequences and control characters other than `\n` and `\t`.
pub fn sanitize(text: &str) -> Cow<'_, str> {
    let without_escapes = ESCAPE_SEQUENCE.replace_all(text, "");
    if without_escapes
        .chars()
        .all(|c| !c.is_control() || c == '\n' || c == '\t')
    {
        return without_escapes;
    }
    Cow::Owned(
        without_escapes
            .chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect(),
    )
}

/// Style one line of code by token class.
pub fn highlight_code_line(line: &str, lang: &str) -> Vec<Span<'static>> {
    let tokens = match lang.to_ascii_lowercase().as_str() {
        "python" | "py" | "sh" | "bash" | "shell" | "zsh" | "ruby" | "rb" | "yaml" | "yml"
        | "toml" | "r" | "perl" => &*HASH_CODE_TOKEN,
        _ => &*SLASH_CODE_TOKEN,
    };

    let base = Style::default().fg(Color::Gray);
    let mut spans = Vec::new();
    let mut last = 0;

    for caps in tokens.captures_iter(line) {
        let Some(m) = caps.get(0) else { continue };
        if m.start() > last {
            spans.push(Span::styled(line[last..m.start()].to_string(), base));
        }
        let style = if caps.name("comment").is_some() {
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC)
        } else if caps.name("string").is_some() {
            Style::default().fg(Color::Green)
        } else if caps.name("number").is_some() {
            Style::default().fg(Color::Magenta)
        } else {
            Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD)
        };
        spans.push(Span::styled(m.as_str().to_string(), style));
        last = m.end();
    }

    if last < line.len() {
        spans.push(Span::styled(line[last..].to_string(), base));
    }
    spans
}

#[derive(Default)]
struct LineBuilder {
    lines: Vec<Line<'static>>,
    current: Vec<Span<'static>>,
    styles: Vec<Style>,
    lists: Vec<Option<u64>>,
    links: Vec<String>,
    code_lang: Option<String>,
    quotes: Vec<TagEnd>,
}

impl LineBuilder {
    fn style(&self) -> Style {
        self.styles
            .iter()
            .fold(Style::default(), |acc, s| acc.patch(*s))
    }

    fn push_span(&mut self, span: Span<'static>) {
        if self.current.is_empty() && !self.quotes.is_empty() {
            self.current.push(Span::styled(
                "│ ".repeat(self.quotes.len()),
                Style::default().fg(Color::DarkGray),
            ));
        }
        self.current.push(span);
    }

    fn push_text(&mut self, text: &str) {
        let style = self.style();
        self.push_span(Span::styled(text.to_string(), style));
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.lines.push(Line::from(std::mem::take(&mut self.current)));
        }
    }

    fn blank(&mut self) {
        self.flush();
        if self.lines.last().is_some_and(|l| l.width() > 0) {
            self.lines.push(Line::default());
        }
    }

    fn code_text(&mut self, text: &str) {
        let lang = self.code_lang.clone().unwrap_or_default();
        for line in text.lines() {
            let mut spans = vec![Span::styled("  ▏ ", Style::default().fg(Color::DarkGray))];
            spans.extend(highlight_code_line(line, &lang));
            self.lines.push(Line::from(spans));
        }
    }

    fn finish(mut self) -> Vec<Line<'static>> {
        self.flush();
        while self.lines.last().is_some_and(|l| l.width() == 0) {
            self.lines.pop();
        }
        self.lines
    }
}

/// Render markdown to terminal lines. Raw HTML is dropped; soft breaks become
/// line breaks.
pub fn render_markdown(text: &str) -> Vec<Line<'static>> {
    let clean = sanitize(text);

    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut out = LineBuilder::default();

    for event in Parser::new_ext(&clean, options) {
        match event {
            Event::Start(tag) => match &tag {
                Tag::Heading { .. } => {
                    out.flush();
                    out.styles.push(
                        Style::default()
                            .fg(Color::Cyan)
                            .add_modifier(Modifier::BOLD),
                    );
                }
                Tag::Strong => out.styles.push(Style::default().add_modifier(Modifier::BOLD)),
                Tag::Emphasis => out.styles.push(Style::default().add_modifier(Modifier::ITALIC)),
                Tag::Strikethrough => {
                    out.styles.push(Style::default().add_modifier(Modifier::CROSSED_OUT))
                }
                Tag::CodeBlock(kind) => {
                    out.flush();
                    let lang = match kind {
                        CodeBlockKind::Fenced(lang) => lang.split_whitespace().next().unwrap_or("").to_string(),
                        CodeBlockKind::Indented => String::new(),
                    };
                    if !lang.is_empty() {
                        out.lines.push(Line::from(Span::styled(
                            format!("  {}", lang),
                            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                        )));
                    }
                    out.code_lang = Some(lang);
                }
                Tag::List(start) => {
                    out.flush();
                    out.lists.push(*start);
                }
                Tag::Item => {
                    out.flush();
                    let indent = "  ".repeat(out.lists.len().saturating_sub(1));
                    let marker = match out.lists.last_mut() {
                        Some(Some(n)) => {
                            let marker = format!("{}{}. ", indent, n);
                            *n += 1;
                            marker
                        }
                        _ => format!("{}• ", indent),
                    };
                    out.push_span(Span::styled(marker, Style::default().fg(Color::Yellow)));
                }
                Tag::BlockQuote(_) => {
                    out.flush();
                    out.quotes.push(tag.to_end());
                }
                Tag::Link { dest_url, .. } => {
                    out.links.push(dest_url.to_string());
                    out.styles.push(
                        Style::default()
                            .fg(Color::Blue)
                            .add_modifier(Modifier::UNDERLINED),
                    );
                }
                Tag::TableRow | Tag::TableHead => out.flush(),
                Tag::TableCell => {
                    if !out.current.is_empty() {
                        out.push_span(Span::styled(" │ ", Style::default().fg(Color::DarkGray)));
                    }
                }
                _ => {}
            },
            Event::End(tag) if out.quotes.last() == Some(&tag) => {
                out.flush();
                out.quotes.pop();
                if out.quotes.is_empty() {
                    out.blank();
                }
            }
            Event::End(tag) => match tag {
                TagEnd::Paragraph => out.blank(),
                TagEnd::Heading(_) => {
                    out.styles.pop();
                    out.blank();
                }
                TagEnd::Strong | TagEnd::Emphasis | TagEnd::Strikethrough => {
                    out.styles.pop();
                }
                TagEnd::CodeBlock => {
                    out.code_lang = None;
                    out.blank();
                }
                TagEnd::List(_) => {
                    out.lists.pop();
                    if out.lists.is_empty() {
                        out.blank();
                    } else {
                        out.flush();
                    }
                }
                TagEnd::Item => out.flush(),
                TagEnd::Link => {
                    out.styles.pop();
                    if let Some(url) = out.links.pop() {
                        out.push_span(Span::styled(
                            format!(" ({})", url),
                            Style::default().fg(Color::DarkGray),
                        ));
                    }
                }
                TagEnd::TableHead | TagEnd::TableRow => out.flush(),
                TagEnd::Table => out.blank(),
                _ => {}
            },
            Event::Text(text) => {
                if out.code_lang.is_some() {
                    out.code_text(&text);
                } else {
                    out.push_text(&text);
                }
            }
            Event::Code(code) => {
                out.push_span(Span::styled(code.into_string(), Style::default().fg(Color::Yellow)));
            }
            Event::SoftBreak | Event::HardBreak => out.flush(),
            Event::Rule => {
                out.flush();
                out.lines.push(Line::from(Span::styled(
                    "─".repeat(24),
                    Style::default().fg(Color::DarkGray),
                )));
                out.blank();
            }
            Event::TaskListMarker(done) => {
                out.push_text(if done { "[x] " } else { "[ ] " });
            }
            // Raw HTML never reaches the terminal.
            Event::Html(_) | Event::InlineHtml(_) => {}
            _ => {}
        }
    }

    out.finish()
}

/// The reply as readable text without markdown syntax, for "copy answer".
pub fn plain_text(markdown: &str) -> String {
    let clean = sanitize(markdown);
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut out = String::new();
    let mut lists: Vec<Option<u64>> = Vec::new();

    for event in Parser::new_ext(&clean, options) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::TaskListMarker(done) => out.push_str(if done { "[x] " } else { "[ ] " }),
            Event::Start(Tag::List(start)) => {
                ensure_newlines(&mut out, 1);
                lists.push(start);
            }
            Event::Start(Tag::Item) => {
                ensure_newlines(&mut out, 1);
                out.push_str(&"  ".repeat(lists.len().saturating_sub(1)));
                match lists.last_mut() {
                    Some(Some(n)) => {
                        out.push_str(&format!("{}. ", n));
                        *n += 1;
                    }
                    _ => out.push_str("- "),
                }
            }
            Event::End(TagEnd::List(_)) => {
                lists.pop();
                ensure_newlines(&mut out, if lists.is_empty() { 2 } else { 1 });
            }
            Event::End(TagEnd::TableCell) => out.push('\t'),
            Event::End(TagEnd::TableHead | TagEnd::TableRow) => ensure_newlines(&mut out, 1),
            Event::End(TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::CodeBlock | TagEnd::Table)
            | Event::Rule => ensure_newlines(&mut out, 2),
            _ => {}
        }
    }

    out.trim_end().to_string()
}

fn ensure_newlines(out: &mut String, n: usize) {
    if out.is_empty() {
        return;
    }
    let have = out.len() - out.trim_end_matches('\n').len();
    for _ in have..n {
        out.push('\n');
    }
}

/// Lifecycle of one assistant reply on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BubbleState {
    Idle,
    Streaming,
    Completed,
    Stopped,
    Errored,
}

/// The assistant reply currently on screen.
#[derive(Debug, Clone)]
pub struct MessageBubble {
    state: BubbleState,
    text: String,
    rendered: Vec<Line<'static>>,
    error: Option<String>,
}

impl Default for MessageBubble {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBubble {
    pub fn new() -> Self {
        Self {
            state: BubbleState::Idle,
            text: String::new(),
            rendered: Vec::new(),
            error: None,
        }
    }

    pub fn state(&self) -> BubbleState {
        self.state
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn start(&mut self) {
        if self.state == BubbleState::Idle {
            self.state = BubbleState::Streaming;
        }
    }

    /// Still showing the loading placeholder.
    pub fn is_waiting(&self) -> bool {
        self.state == BubbleState::Streaming && self.text.is_empty()
    }

    pub fn push_token(&mut self, token: &str) {
        if self.state != BubbleState::Streaming {
            return;
        }
        self.text.push_str(token);
        self.rendered = render_markdown(&self.text);
    }

    pub fn complete(&mut self) {
        if self.state == BubbleState::Streaming {
            self.state = BubbleState::Completed;
        }
    }

    pub fn stop(&mut self) {
        if self.state == BubbleState::Streaming {
            self.state = BubbleState::Stopped;
        }
    }

    /// Errors can also land on a bubble that never started (no credential).
    pub fn fail(&mut self, message: impl Into<String>) {
        if matches!(self.state, BubbleState::Idle | BubbleState::Streaming) {
            self.state = BubbleState::Errored;
            self.error = Some(message.into());
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            BubbleState::Completed | BubbleState::Stopped | BubbleState::Errored
        )
    }

    pub fn toolbar_visible(&self) -> bool {
        self.is_terminal()
    }

    pub fn stop_enabled(&self) -> bool {
        self.state == BubbleState::Streaming
    }

    /// Lines to draw, including the stop annotation or the error text.
    pub fn lines(&self) -> Vec<Line<'static>> {
        match self.state {
            BubbleState::Errored => {
                let message = self.error.as_deref().unwrap_or("Connection failed.");
                vec![Line::from(vec![
                    Span::styled(
                        "Error: ",
                        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(
                        sanitize(message.strip_prefix("Error: ").unwrap_or(message)).into_owned(),
                        Style::default().fg(Color::Red),
                    ),
                ])]
            }
            BubbleState::Stopped => {
                let mut lines = self.rendered.clone();
                lines.push(Line::from(Span::styled(
                    STOPPED_ANNOTATION,
                    Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                )));
                lines
            }
            _ => self.rendered.clone(),
        }
    }
}

impl TokenSink for MessageBubble {
    fn on_token(&mut self, token: &str, _accumulated: &str) {
        self.push_token(token);
    }
}
