//! Small text helpers shared by the loop and the classifier.

/// Separator placed between the kept head and tail of a truncated result.
pub const TRUNCATION_MARKER: &str = "  ...  ";

/// Keep the first `head` and last `tail` characters when `text` exceeds `limit`.
///
/// Counts characters, not bytes, so multi-byte output is never split.
pub fn truncate_middle(text: &str, limit: usize, head: usize, tail: usize) -> String {
    let total = text.chars().count();
    if total <= limit {
        return text.to_string();
    }
    let head_part: String = text.chars().take(head).collect();
    let tail_part: String = text.chars().skip(total.saturating_sub(tail)).collect();
    format!("{head_part}{TRUNCATION_MARKER}{tail_part}")
}

/// Return the substring from the first `open` to the last `close`, inclusive.
pub fn outermost_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Single-quote `text` for a POSIX shell.
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_middle("abc", 5, 1, 1), "abc");
    }

    #[test]
    fn long_text_keeps_head_and_tail() {
        let text = "a".repeat(10) + &"b".repeat(10);
        let out = truncate_middle(&text, 15, 3, 4);
        assert_eq!(out, format!("aaa{TRUNCATION_MARKER}bbbb"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "\u{e9}".repeat(20);
        let out = truncate_middle(&text, 10, 2, 2);
        assert_eq!(out, format!("\u{e9}\u{e9}{TRUNCATION_MARKER}\u{e9}\u{e9}"));
    }

    #[test]
    fn fragment_spans_outermost_brackets() {
        let text = "Sure! ```json\n{\"a\": {\"b\": 1}}\n``` done";
        assert_eq!(outermost_fragment(text, '{', '}'), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(outermost_fragment("no json", '{', '}'), None);
        assert_eq!(outermost_fragment("} backwards {", '{', '}'), None);
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("/a b"), "'/a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
