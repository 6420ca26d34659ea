//! Terminal Output Utilities: pure, total, idempotent string cleaners.
//!
//! None of these functions perform I/O or can fail; they exist purely to
//! turn raw PTY bytes into something a prompt-detector or a human log can
//! read.

use once_cell::sync::Lazy;
use regex::Regex;

static SGR_OR_CSI: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap());
static OSC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\][^\x07\x1b]*(\x07|\x1b\\)").unwrap());
static CURSOR_FORWARD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[(\d*)C").unwrap());
static CURSOR_DOWN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[(\d*)B").unwrap());
static ORPHAN_CSI: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+)?[mABKJHf]").unwrap());
static BOX_DRAWING: &[char] = &['│', '┃', '║', '|', '┌', '┐', '└', '┘', '─', '━', '═'];

const MAX_CURSOR_EXPANSION: usize = 200;

/// Remove SGR/CSI sequences, OSC sequences terminated by BEL/ST, and orphan
/// digit-prefixed CSI fragments left over from a torn capture. Cursor-forward
/// becomes spaces, cursor-down becomes newlines (both capped).
pub fn strip_ansi(s: &str) -> String {
    let s = OSC.replace_all(s, "");
    let s = CURSOR_FORWARD.replace_all(&s, |caps: &regex::Captures| {
        let n: usize = caps[1].parse().unwrap_or(1).min(MAX_CURSOR_EXPANSION);
        " ".repeat(n.max(1))
    });
    let s = CURSOR_DOWN.replace_all(&s, |caps: &regex::Captures| {
        let n: usize = caps[1].parse().unwrap_or(1).min(MAX_CURSOR_EXPANSION);
        "\n".repeat(n.max(1))
    });
    let s = SGR_OR_CSI.replace_all(&s, "");
    let s = ORPHAN_CSI.replace_all(&s, "");
    s.replace('\x1b', "")
}

/// Within each logical line, keep only the text after the last `\r` (and
/// drop that segment if it is empty, keeping the prior one), modeling how a
/// real terminal overwrites a line on carriage return.
pub fn fold_carriage_returns(s: &str) -> String {
    s.split('\n')
        .map(fold_line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn fold_line(line: &str) -> String {
    let segments: Vec<&str> = line.split('\r').collect();
    for seg in segments.iter().rev() {
        if !seg.is_empty() {
            return seg.to_string();
        }
    }
    String::new()
}

/// Remove leading/trailing box-drawing characters per line; drop
/// pure-decoration lines (all box-drawing/whitespace); preserve `---`
/// separators verbatim.
pub fn strip_tui_borders(s: &str) -> String {
    s.split('\n')
        .filter_map(|line| {
            let trimmed = line.trim();
            if trimmed.chars().all(|c| c == '-') && !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
            if !trimmed.is_empty() && trimmed.chars().all(|c| BOX_DRAWING.contains(&c) || c.is_whitespace())
            {
                return None;
            }
            let stripped = trimmed
                .trim_start_matches(BOX_DRAWING)
                .trim_end_matches(BOX_DRAWING)
                .trim();
            Some(stripped.to_string())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse runs of spaces to one, cap consecutive blank lines at two.
pub fn normalize_whitespace(s: &str) -> String {
    let space_collapsed: String = {
        let mut out = String::with_capacity(s.len());
        let mut last_was_space = false;
        for c in s.chars() {
            if c == ' ' {
                if !last_was_space {
                    out.push(c);
                }
                last_was_space = true;
            } else {
                out.push(c);
                last_was_space = false;
            }
        }
        out
    };

    let mut out_lines = Vec::new();
    let mut blank_run = 0;
    for line in space_collapsed.split('\n') {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run <= 2 {
                out_lines.push(line);
            }
        } else {
            blank_run = 0;
            out_lines.push(line);
        }
    }
    out_lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idempotent(f: impl Fn(&str) -> String, input: &str) {
        let once = f(input);
        let twice = f(&once);
        assert_eq!(once, twice, "not idempotent for input {:?}", input);
    }

    #[test]
    fn strip_ansi_removes_sgr_and_cursor_moves() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m"), "red");
        assert_eq!(strip_ansi("a\x1b[3Cb"), "a   b");
        assert_eq!(strip_ansi("a\x1b[2Bb"), "a\n\nb");
    }

    #[test]
    fn strip_ansi_removes_osc_sequences() {
        assert_eq!(strip_ansi("\x1b]0;title\x07visible"), "visible");
    }

    #[test]
    fn strip_ansi_is_idempotent() {
        for input in [
            "\x1b[31mred\x1b[0m",
            "plain text",
            "[2Korphan",
            "\x1b]0;t\x07tail",
        ] {
            idempotent(strip_ansi, input);
        }
    }

    #[test]
    fn fold_carriage_returns_keeps_last_segment() {
        assert_eq!(fold_carriage_returns("abc\rdefg"), "defg");
        assert_eq!(fold_carriage_returns("line1\nabc\rxy\n"), "line1\nxy\n");
    }

    #[test]
    fn fold_carriage_returns_is_idempotent() {
        for input in ["abc\rdefg", "no carriage return here", "a\r\rb"] {
            idempotent(fold_carriage_returns, input);
        }
    }

    #[test]
    fn strip_tui_borders_drops_decoration_lines_and_keeps_separators() {
        let input = "│ hello │\n││││\n---\nworld";
        let cleaned = strip_tui_borders(input);
        assert_eq!(cleaned, "hello\n---\nworld");
    }

    #[test]
    fn strip_tui_borders_is_idempotent() {
        for input in ["│ hello │", "plain", "---", "││││"] {
            idempotent(strip_tui_borders, input);
        }
    }

    #[test]
    fn normalize_whitespace_collapses_spaces_and_caps_blank_lines() {
        let input = "a   b\n\n\n\nc";
        assert_eq!(normalize_whitespace(input), "a b\n\n\nc");
    }
}
