//! `TerminalPatterns`: constants shared by the runtime adapters and the
//! message delivery engine for recognizing prompt/processing/paste state.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::cleanup::strip_tui_borders;

/// Characters that, alone on the last non-empty line, indicate an idle
/// shell-style prompt.
pub const PROMPT_CHARS: &[char] = &['❯', '>', '⏵', '$'];

/// Regex matching a prompt signature at the tail of a pane.
pub static PROMPT_STREAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(\$|>|❯❯?|⏵)\s?$|^(❯❯|>|!)\s").unwrap());

/// Words indicating the runtime is actively processing, not idle.
pub const PROCESSING_INDICATORS: &[&str] = &[
    "thinking",
    "analyzing",
    "processing",
    "generating",
    "reading",
    "searching",
    "registering",
];

/// Regex matching any processing indicator, case-insensitively.
pub static PROCESSING_INDICATOR_RE: Lazy<Regex> = Lazy::new(|| {
    let alternation = PROCESSING_INDICATORS.join("|");
    Regex::new(&format!("(?i){alternation}")).unwrap()
});

/// Marker emitted by bracketed-paste-aware terminals while a paste is in
/// flight.
pub const PASTE_INDICATOR: &str = "\x1b[200~";

/// Gemini-CLI shell-mode prompt: a leading `!` indicates input is executed
/// by the host shell rather than the runtime.
pub static SHELL_MODE_PROMPT_PATTERNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^!\s").unwrap());

/// Implements P2: true iff the last non-empty line (after border stripping)
/// equals a single prompt char or starts with `"❯❯ "`, `"> "`, or `"! "`.
pub fn is_at_prompt(output: &str) -> bool {
    let cleaned = strip_tui_borders(output);
    let last_non_empty = cleaned
        .split('\n')
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty());

    match last_non_empty {
        None => false,
        Some(line) => {
            let is_single_prompt_char =
                line.chars().count() == 1 && PROMPT_CHARS.contains(&line.chars().next().unwrap());
            is_single_prompt_char
                || line.starts_with("❯❯ ")
                || line.starts_with("> ")
                || line.starts_with("! ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_single_prompt_chars() {
        for c in PROMPT_CHARS {
            assert!(is_at_prompt(&c.to_string()), "expected {c} to be a prompt");
        }
    }

    #[test]
    fn recognizes_prefixed_prompts() {
        assert!(is_at_prompt("some output\n❯❯ "));
        assert!(is_at_prompt("some output\n> "));
        assert!(is_at_prompt("some output\n! "));
    }

    #[test]
    fn rejects_non_prompt_tails() {
        assert!(!is_at_prompt("still thinking..."));
        assert!(!is_at_prompt(""));
        assert!(!is_at_prompt("\n\n"));
    }

    #[test]
    fn shell_mode_prompt_detected() {
        assert!(SHELL_MODE_PROMPT_PATTERNS.is_match("! search foo"));
        assert!(!SHELL_MODE_PROMPT_PATTERNS.is_match("❯ normal"));
    }
}
