//! Commands a plan may run. Anything else is skipped without spawning.

/// Known-safe build, lint and typecheck invocations, matched exactly.
pub const ALLOWED_COMMANDS: &[&str] = &[
    "npm run build",
    "npm run lint",
    "npm run typecheck",
    "npx tsc --noEmit",
    "npx next lint",
    "pnpm build",
    "pnpm lint",
    "pnpm typecheck",
    "yarn build",
    "yarn lint",
];

/// Exact-match allow-list check (no trimming, no prefix matching).
pub fn is_allowed(allow_list: &[String], command: &str) -> bool {
    allow_list.iter().any(|allowed| allowed == command)
}

pub fn default_allow_list() -> Vec<String> {
    ALLOWED_COMMANDS.iter().map(|c| (*c).to_string()).collect()
}
