//! Fallback assistant message for planner replies that carry none.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Action;

const PROMPT_ECHO_CHARS: usize = 60;
const TOUCHED_PATHS_SHOWN: usize = 3;

static BUTTON_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<button[^>]*>([^<]{1,40})</button>").expect("button pattern is valid")
});
static UTILITY_COLOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:bg|text|border)-[a-z]+-\d{2,3}\b").expect("utility color pattern is valid")
});
static CSS_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"color:\s*([^;}{]+)").expect("css color pattern is valid"));
static CSS_BACKGROUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"background(?:-color)?:\s*([^;}{]+)").expect("css background pattern is valid")
});
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<h1[^>]*>").expect("heading pattern is valid"));
static PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<p[^>]*>").expect("paragraph pattern is valid"));
static LAYOUT_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)className=.*?(?:grid|flex|container)").expect("layout pattern is valid")
});

/// Render a short human-readable summary of an applied plan.
///
/// Example: `changes applied (1 create, 0 update, 0 delete, 0 run). Touched:
/// app/hello/page.tsx. You asked: "add a hello page".`
pub fn summarize_plan(prompt: &str, actions: &[Action]) -> String {
    let mut created = 0;
    let mut updated = 0;
    let mut deleted = 0;
    let mut ran = 0;
    for action in actions {
        match action {
            Action::CreateFile { .. } => created += 1,
            Action::UpdateFile { .. } => updated += 1,
            Action::DeleteFile { .. } => deleted += 1,
            Action::RunCommand { .. } => ran += 1,
        }
    }

    let head = if actions.is_empty() {
        "no-op"
    } else {
        "changes applied"
    };
    let mut message =
        format!("{head} ({created} create, {updated} update, {deleted} delete, {ran} run).");

    let paths: Vec<&str> = actions.iter().filter_map(Action::path).collect();
    if !paths.is_empty() {
        let shown = paths
            .iter()
            .take(TOUCHED_PATHS_SHOWN)
            .copied()
            .collect::<Vec<_>>()
            .join(", ");
        let more = if paths.len() > TOUCHED_PATHS_SHOWN {
            "…"
        } else {
            ""
        };
        message.push_str(&format!(" Touched: {shown}{more}."));
    }

    let hints: Vec<String> = actions
        .iter()
        .filter_map(|action| match action {
            Action::CreateFile { contents, .. } | Action::UpdateFile { contents, .. } => {
                Some(content_hints(contents))
            }
            _ => None,
        })
        .flatten()
        .collect();
    if !hints.is_empty() {
        message.push_str(&format!(" I {}.", hints.join(", ")));
    }

    message.push_str(&format!(" You asked: \"{}\".", peek(prompt)));
    message
}

/// Guess what a written file changed from its markup, e.g.
/// `added/updated a button "Sign up"` or `changed the main heading`.
fn content_hints(contents: &str) -> Vec<String> {
    let mut hints = Vec::new();
    if contents.to_lowercase().contains("<button") {
        match button_label(contents) {
            Some(label) => hints.push(format!("added/updated a button \"{label}\"")),
            None => hints.push("added/updated a button".to_string()),
        }
        if let Some(color) = guess_color(contents) {
            hints.push(format!("with {color}"));
        }
    }
    if HEADING.is_match(contents) {
        hints.push("changed the main heading".to_string());
    }
    if PARAGRAPH.is_match(contents) {
        hints.push("updated page copy".to_string());
    }
    if LAYOUT_CLASS.is_match(contents) {
        hints.push("adjusted layout".to_string());
    }
    hints
}

fn button_label(contents: &str) -> Option<String> {
    let label = BUTTON_LABEL.captures(contents)?.get(1)?.as_str();
    let label = label.split_whitespace().collect::<Vec<_>>().join(" ");
    (!label.is_empty()).then_some(label)
}

/// First Tailwind color utility, else the first CSS `color`/`background`.
fn guess_color(contents: &str) -> Option<String> {
    let lower = contents.to_lowercase();
    if let Some(found) = UTILITY_COLOR.find(&lower) {
        return Some(found.as_str().to_string());
    }
    if let Some(caps) = CSS_COLOR.captures(&lower) {
        return Some(format!("color {}", caps[1].trim()));
    }
    CSS_BACKGROUND
        .captures(&lower)
        .map(|caps| format!("background {}", caps[1].trim()))
}

/// Collapse whitespace and cut to [`PROMPT_ECHO_CHARS`] characters.
fn peek(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= PROMPT_ECHO_CHARS {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(PROMPT_ECHO_CHARS).collect();
    cut.push('…');
    cut
}
