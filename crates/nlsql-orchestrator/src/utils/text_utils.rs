//! Text helpers for model output and bounded prompt sections

use std::borrow::Cow;
use regex::Regex;
use lazy_static::lazy_static;

lazy_static! {
    static ref FENCE_OPEN_REGEX: Regex = Regex::new(r"^```[A-Za-z0-9_+\-]*[ \t]*\r?\n?").unwrap();
}

const FENCE: &str = "```";
const TRUNCATION_MARKER: &str = "... (truncated)";

pub struct TextUtils;

impl TextUtils {
    /// Extract the query from model output and trim. With a fenced block
    /// (```sql ... ```) only the text inside the first block is kept, so prose
    /// around it is dropped; a stray closing fence ends the text.
    pub fn strip_code_fences(text: &str) -> Cow<'_, str> {
        let trimmed = text.trim();
        let Some(first) = trimmed.find(FENCE) else {
            return Cow::Borrowed(trimmed);
        };
        let opened = &trimmed[first..];
        let body_start = FENCE_OPEN_REGEX.find(opened).map_or(FENCE.len(), |m| m.end());
        let body = &opened[body_start..];
        let inner = match body.find(FENCE) {
            Some(close) => &body[..close],
            None if first == 0 => body,
            None => &trimmed[..first],
        };
        Cow::Borrowed(inner.trim())
    }

    /// First line, cut to `max_chars` characters.
    pub fn first_line(text: &str, max_chars: usize) -> String {
        text.lines().next().unwrap_or("").chars().take(max_chars).collect()
    }

    /// Truncate on a line boundary to at most `max_chars` characters, marking the cut.
    /// A budget too small to hold the marker drops the text entirely.
    pub fn truncate_lines(text: &str, max_chars: usize) -> Cow<'_, str> {
        if text.chars().count() <= max_chars {
            return Cow::Borrowed(text);
        }
        if max_chars <= TRUNCATION_MARKER.len() {
            return Cow::Borrowed("");
        }
        let budget = max_chars - (TRUNCATION_MARKER.len() + 1);

        let mut kept = String::new();
        let mut used = 0;
        for line in text.lines() {
            let cost = line.chars().count() + 1;
            if used + cost > budget {
                break;
            }
            kept.push_str(line);
            kept.push('\n');
            used += cost;
        }
        if kept.is_empty() {
            kept = text.chars().take(budget).collect();
            kept.push('\n');
        }
        kept.push_str(TRUNCATION_MARKER);
        Cow::Owned(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_sql_fence() {
        let raw = "```sql\nSELECT ISNULL(SUM(tmamoney1), 0) FROM outm_2505\n```\n";
        assert_eq!(TextUtils::strip_code_fences(raw), "SELECT ISNULL(SUM(tmamoney1), 0) FROM outm_2505");
    }

    #[test]
    fn test_strip_bare_and_inline_fences() {
        assert_eq!(TextUtils::strip_code_fences("```\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(TextUtils::strip_code_fences("```sql SELECT 1```"), "SELECT 1");
        assert_eq!(TextUtils::strip_code_fences("  SELECT 1  "), "SELECT 1");
    }

    #[test]
    fn test_unfenced_text_keeps_inner_content() {
        let query = "SELECT descr\nFROM parts\nWHERE barcode = '880'";
        assert_eq!(TextUtils::strip_code_fences(query), query);
    }

    #[test]
    fn test_prose_after_fence_is_dropped() {
        let raw = "```sql\nSELECT 1\n```\nThis returns one row.";
        assert_eq!(TextUtils::strip_code_fences(raw), "SELECT 1");
        let lead = "Here is the query:\n```sql\nSELECT descr FROM parts\n```\nIt lists every part.";
        assert_eq!(TextUtils::strip_code_fences(lead), "SELECT descr FROM parts");
        assert_eq!(TextUtils::strip_code_fences("SELECT 1\n```"), "SELECT 1");
    }

    #[test]
    fn test_first_line() {
        let version = "Microsoft SQL Server 2019 (RTM) - 15.0.2000.5 (X64)\n\tSep 24 2019";
        assert_eq!(TextUtils::first_line(version, 30), "Microsoft SQL Server 2019 (RTM");
    }

    #[test]
    fn test_truncate_lines_respects_budget() {
        let text = (0..100).map(|i| format!("Table 't{i}': id (int) [PK]")).collect::<Vec<_>>().join("\n");
        let cut = TextUtils::truncate_lines(&text, 200);
        assert!(cut.chars().count() <= 200);
        assert!(cut.ends_with("... (truncated)"));
        assert!(cut.starts_with("Table 't0'"));
        assert_eq!(TextUtils::truncate_lines("short", 200), "short");
    }

    #[test]
    fn test_tiny_budget_drops_text_instead_of_cutting_silently() {
        let rules = "tmamoney1 is the net sale amount\nbarcode is the part key";
        for max_chars in [0, 5, TRUNCATION_MARKER.len()] {
            assert_eq!(TextUtils::truncate_lines(rules, max_chars), "");
        }
        let cut = TextUtils::truncate_lines(rules, TRUNCATION_MARKER.len() + 1);
        assert!(cut.ends_with(TRUNCATION_MARKER));
        assert!(cut.chars().count() <= TRUNCATION_MARKER.len() + 1);
    }
}
