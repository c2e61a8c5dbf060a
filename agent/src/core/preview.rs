//! Preview route inference from the files a plan touched.
//!
//! Routes follow the app-router convention: `app/<segments>/page.<ext>` maps
//! to `/<segments>`, with `(group)` segments dropped. The interactive chat
//! route is never offered as a preview.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Action;

pub const ROOT_ROUTE: &str = "/";

/// Route directory of the orchestrator's own chat surface.
pub const CHAT_ROUTE_DIR: &str = "app/chat";

/// A page file beneath at least one route directory.
static ROUTED_PAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:src/)?app/(?P<route>.+)/page\.(?:tsx|jsx|ts|js|mdx)$")
        .expect("routed page pattern is valid")
});

/// Infer the route to preview from the most recently listed routed page.
///
/// Pages whose route collapses to `/` (the root page, or a page under only
/// `(group)` directories) never win the walk; they only matter when no routed
/// page was touched, and then the answer is the root route anyway.
pub fn infer_preview_path(actions: &[Action]) -> String {
    for path in actions.iter().rev().filter_map(Action::path) {
        let path = normalize(path);
        if is_chat_path(&path) {
            continue;
        }
        if let Some(route) = route_for_page(&path).filter(|route| route != ROOT_ROUTE) {
            return route;
        }
    }

    // No routed page: a touched root page and the default both preview `/`.
    ROOT_ROUTE.to_string()
}

/// Map a page file beneath a route directory to its route.
///
/// `app/page.tsx` itself is not a routed page and yields `None`; a page under
/// only `(group)` directories yields `/`.
pub fn route_for_page(path: &str) -> Option<String> {
    let captures = ROUTED_PAGE.captures(path)?;
    let segments: Vec<&str> = captures
        .name("route")
        .map(|m| m.as_str())
        .unwrap_or_default()
        .split('/')
        .filter(|segment| !segment.is_empty() && !is_group_segment(segment))
        .collect();
    if segments.is_empty() {
        return Some(ROOT_ROUTE.to_string());
    }
    Some(format!("/{}", segments.join("/")))
}

/// Whether `path` lies in the chat route (`app/chat` or `src/app/chat`).
pub fn is_chat_path(path: &str) -> bool {
    let path = normalize(path);
    let path = path.strip_prefix("src/").unwrap_or(&path);
    path == CHAT_ROUTE_DIR || path.starts_with(&format!("{CHAT_ROUTE_DIR}/"))
}

fn is_group_segment(segment: &str) -> bool {
    segment.starts_with('(') && segment.ends_with(')')
}

fn normalize(path: &str) -> String {
    path.trim().trim_start_matches("./").replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(path: &str) -> Action {
        Action::CreateFile {
            path: path.to_string(),
            contents: String::new(),
        }
    }

    #[test]
    fn last_touched_page_wins() {
        let plan = vec![create("app/a/page.tsx"), create("app/b/page.tsx")];
        assert_eq!(infer_preview_path(&plan), "/b");
    }

    #[test]
    fn chat_route_is_excluded() {
        let plan = vec![create("app/chat/page.tsx")];
        assert_eq!(infer_preview_path(&plan), "/");

        let plan = vec![create("app/about/page.tsx"), create("app/chat/page.tsx")];
        assert_eq!(infer_preview_path(&plan), "/about");
    }

    #[test]
    fn group_segments_are_dropped() {
        assert_eq!(
            route_for_page("app/(shop)/cart/page.tsx"),
            Some("/cart".to_string())
        );
        assert_eq!(
            route_for_page("app/(marketing)/page.tsx"),
            Some("/".to_string())
        );
        assert_eq!(
            route_for_page("src/app/blog/[slug]/page.jsx"),
            Some("/blog/[slug]".to_string())
        );
    }

    #[test]
    fn root_page_does_not_beat_earlier_routed_page() {
        assert_eq!(route_for_page("app/page.tsx"), None);
        let plan = vec![create("app/a/page.tsx"), create("app/page.tsx")];
        assert_eq!(infer_preview_path(&plan), "/a");

        let plan = vec![create("app/a/page.tsx"), create("app/(marketing)/page.tsx")];
        assert_eq!(infer_preview_path(&plan), "/a");
    }

    #[test]
    fn root_page_alone_previews_root() {
        let plan = vec![
            create("app/page.tsx"),
            Action::UpdateFile {
                path: "app/globals.css".to_string(),
                contents: String::new(),
            },
        ];
        assert_eq!(infer_preview_path(&plan), "/");
    }

    #[test]
    fn non_page_files_are_skipped() {
        let plan = vec![
            create("app/hello/page.tsx"),
            create("app/hello/layout.tsx"),
            create("components/Button.tsx"),
            Action::RunCommand {
                command: "npm run lint".to_string(),
            },
        ];
        assert_eq!(infer_preview_path(&plan), "/hello");
    }

    #[test]
    fn deleted_pages_still_count_as_touched() {
        let plan = vec![Action::DeleteFile {
            path: "./app/old/page.tsx".to_string(),
        }];
        assert_eq!(infer_preview_path(&plan), "/old");
    }

    #[test]
    fn empty_plan_defaults_to_root() {
        assert_eq!(infer_preview_path(&[]), "/");
    }
}
