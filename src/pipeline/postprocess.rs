//! Post-processing: deterministic cleanup of a batch's transliterated text.
//!
//! Even with a strict system instruction the model occasionally wraps its
//! answer in a code fence, emits CRLF line endings, or adds a "Page 3"
//! marker line. These rules remove such artefacts without touching content:
//! a marker line is only dropped when the batch's source text is known and
//! does not contain its number.
//! They run once per batch on the fully concatenated response, before the
//! result is committed to the ledger, so the committed segment is exactly
//! what a resumed run would append.
//!
//! Rules (applied in order):
//! 1. Strip outer code fences
//! 2. Normalise line endings (CRLF → LF)
//! 3. Trim trailing whitespace per line
//! 4. Drop standalone page-marker lines the source does not carry
//! 5. Collapse 3+ consecutive blank lines down to 2
//! 6. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
//! 7. Trim leading/trailing blank lines

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Apply all cleanup rules to a raw batch response.
///
/// `source` is the batch's input text when every unit was text. Without it
/// (page images) marker lines are kept, since there is nothing to check
/// them against.
pub fn clean_segment(input: &str, source: Option<&str>) -> String {
    let s = strip_code_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = match source {
        Some(source) => drop_invented_page_markers(&s, source),
        None => s,
    };
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    s.trim_matches('\n').to_string()
}

// ── Rule 1: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\r?\n(.*)\r?\n```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Drop page-marker lines ───────────────────────────────────────────

static RE_PAGE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:[-=*]+\s*)?(?:page|safha|safa)\s+(\d+)(?:\s+of\s+\d+)?(?:\s*[-=*]+)?\s*$")
        .unwrap()
});

static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

fn drop_invented_page_markers(input: &str, source: &str) -> String {
    let source_numbers: HashSet<u64> = RE_NUMBER
        .find_iter(source)
        .filter_map(|m| parse_digits(m.as_str()))
        .collect();

    input
        .lines()
        .filter(|line| {
            let Some(caps) = RE_PAGE_MARKER.captures(line) else {
                return true;
            };
            parse_digits(&caps[1]).is_some_and(|n| source_numbers.contains(&n))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse ASCII, Arabic-Indic or Extended Arabic-Indic (Urdu) digits.
fn parse_digits(digits: &str) -> Option<u64> {
    let ascii: String = digits
        .chars()
        .map(|c| match c {
            '\u{0660}'..='\u{0669}' => char::from(b'0' + (c as u32 - 0x0660) as u8),
            '\u{06F0}'..='\u{06F9}' => char::from(b'0' + (c as u32 - 0x06F0) as u8),
            other => other,
        })
        .collect();
    ascii.parse().ok()
}

// ── Rule 5: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 6: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{2060}'], "")
}
