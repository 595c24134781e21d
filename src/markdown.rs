//! Incremental markdown rendering.
//!
//! [`render`] is called with the whole reply accumulated so far, once per
//! delta, so it has to be cheap and it has to produce balanced markup for any
//! prefix of a reply. All text is HTML-escaped before any formatting rule
//! runs; rules only ever add tags around escaped text.
//!
//! Rules apply in this order: fenced code blocks, inline code spans,
//! headings, bold, italic, links, line breaks, then list grouping. An
//! unterminated fence or an open list at the end of the input is closed.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static ORDERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\s+(.*)$").expect("ordered item pattern"));
static UNORDERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-\s+(.*)$").expect("unordered item pattern"));
static BOLD_STARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("bold pattern"));
static BOLD_UNDERSCORES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b__(.+?)__\b").expect("bold pattern"));
static ITALIC_STAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*(.+?)\*").expect("italic pattern"));
static ITALIC_UNDERSCORE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b_(.+?)_\b").expect("italic pattern"));
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").expect("link pattern"));

const FENCE: &str = "```";
const LINK_PREFIXES: &[&str] = &["http://", "https://", "mailto:", "/", "#"];

/// Render `text` as HTML-safe markup.
pub fn render(text: &str) -> String {
    let escaped = escape(text);
    let segments = escaped.split(FENCE).collect::<Vec<_>>();
    let mut out = String::with_capacity(escaped.len() + 64);
    for (idx, segment) in segments.iter().enumerate() {
        if idx % 2 == 1 {
            code_block(&mut out, segment);
            continue;
        }
        let mut body = *segment;
        if idx > 0 {
            body = body.strip_prefix('\n').unwrap_or(body);
        }
        if idx + 1 < segments.len() {
            body = body.strip_suffix('\n').unwrap_or(body);
        }
        render_lines(&mut out, body);
    }
    out
}

/// Escape the five HTML-significant characters.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
    }
    out
}

fn code_block(out: &mut String, segment: &str) {
    let (language, code) = match segment.split_once('\n') {
        Some((first, rest)) if is_language_tag(first.trim()) => (Some(first.trim()), rest),
        Some(("", rest)) => (None, rest),
        _ => (None, segment),
    };
    let code = code.strip_suffix('\n').unwrap_or(code);
    match language {
        Some(language) => {
            out.push_str("<pre><code class=\"language-");
            out.push_str(language);
            out.push_str("\">");
        }
        None => out.push_str("<pre><code>"),
    }
    out.push_str(code);
    out.push_str("</code></pre>");
}

fn is_language_tag(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '_' | '.'))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ListState {
    None,
    Ordered,
    Unordered,
}

impl ListState {
    fn open_tag(self) -> &'static str {
        match self {
            ListState::None => "",
            ListState::Ordered => "<ol>",
            ListState::Unordered => "<ul>",
        }
    }

    fn close_tag(self) -> &'static str {
        match self {
            ListState::None => "",
            ListState::Ordered => "</ol>",
            ListState::Unordered => "</ul>",
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Fold {
    list: ListState,
    after_text: bool,
}

impl Fold {
    const START: Fold = Fold {
        list: ListState::None,
        after_text: false,
    };

    fn enter_list(self, out: &mut String, list: ListState) -> Fold {
        if self.list != list {
            out.push_str(self.list.close_tag());
            out.push_str(list.open_tag());
        }
        Fold {
            list,
            after_text: false,
        }
    }

    fn leave_list(self, out: &mut String) -> Fold {
        out.push_str(self.list.close_tag());
        Fold {
            list: ListState::None,
            after_text: self.after_text && self.list == ListState::None,
        }
    }
}

fn render_lines(out: &mut String, body: &str) {
    let end = body
        .split('\n')
        .fold(Fold::START, |state, line| step(out, state, line));
    end.leave_list(out);
}

fn step(out: &mut String, state: Fold, line: &str) -> Fold {
    if let Some(caps) = ORDERED_ITEM.captures(line) {
        let state = state.enter_list(out, ListState::Ordered);
        list_item(out, &caps);
        return state;
    }
    if let Some(caps) = UNORDERED_ITEM.captures(line) {
        let state = state.enter_list(out, ListState::Unordered);
        list_item(out, &caps);
        return state;
    }
    let state = state.leave_list(out);
    if let Some((level, rest)) = heading(line) {
        out.push_str(&format!("<h{level}>"));
        out.push_str(&inline(rest));
        out.push_str(&format!("</h{level}>"));
        return Fold {
            list: ListState::None,
            after_text: false,
        };
    }
    if line.is_empty() && !state.after_text {
        return state;
    }
    if state.after_text {
        out.push_str("<br>");
    }
    out.push_str(&inline(line));
    Fold {
        list: ListState::None,
        after_text: true,
    }
}

fn list_item(out: &mut String, caps: &Captures<'_>) {
    out.push_str("<li>");
    out.push_str(&inline(caps.get(1).map_or("", |m| m.as_str())));
    out.push_str("</li>");
}

fn heading(line: &str) -> Option<(u8, &str)> {
    if let Some(rest) = line.strip_prefix("### ") {
        Some((3, rest))
    } else if let Some(rest) = line.strip_prefix("## ") {
        Some((2, rest))
    } else {
        line.strip_prefix("# ").map(|rest| (1, rest))
    }
}

fn inline(line: &str) -> String {
    let parts = line.split('`').collect::<Vec<_>>();
    let balanced = parts.len() % 2 == 1;
    let mut out = String::with_capacity(line.len());
    for (idx, part) in parts.iter().enumerate() {
        if idx % 2 == 0 {
            out.push_str(&emphasis(part));
        } else if !balanced && idx + 1 == parts.len() {
            out.push('`');
            out.push_str(&emphasis(part));
        } else {
            out.push_str("<code>");
            out.push_str(part);
            out.push_str("</code>");
        }
    }
    out
}

fn emphasis(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    // Links first, so hrefs never see emphasis markers rewritten.
    for caps in LINK.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&styled(&text[last..whole.start()]));
        let label = styled(&caps[1]);
        let href = &caps[2];
        if is_safe_href(href) {
            out.push_str(&format!(
                "<a href=\"{href}\" target=\"_blank\" rel=\"noopener\">{label}</a>"
            ));
        } else {
            out.push_str(&label);
        }
        last = whole.end();
    }
    out.push_str(&styled(&text[last..]));
    out
}

fn styled(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let text = BOLD_STARS.replace_all(text, "<strong>${1}</strong>");
    let text = BOLD_UNDERSCORES.replace_all(&text, "<strong>${1}</strong>");
    let text = ITALIC_STAR.replace_all(&text, "<em>${1}</em>");
    ITALIC_UNDERSCORE
        .replace_all(&text, "<em>${1}</em>")
        .into_owned()
}

fn is_safe_href(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    LINK_PREFIXES.iter().any(|p| lower.starts_with(p))
}
