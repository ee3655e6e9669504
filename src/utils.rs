//! Small string helpers shared across the crate.

/// Truncates a string to at most `max_chars` characters, adding "..." if truncated.
///
/// UTF-8 safe: counts characters, not bytes, so multi-byte content (emoji,
/// CJK) never panics on a boundary.
///
/// # Examples
/// ```
/// use pagepilot::utils::truncate_str;
///
/// assert_eq!(truncate_str("hello", 10), "hello");
/// assert_eq!(truncate_str("hello world", 8), "hello...");
/// ```
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    truncate_impl(s, max_chars, "...")
}

/// Like [`truncate_str`] but with a `"\n... (truncated)"` suffix, suitable for
/// multi-line tool output where the cut should be visible on its own line.
pub fn truncate_with_note(s: &str, max_chars: usize) -> String {
    truncate_impl(s, max_chars, "\n... (truncated)")
}

fn truncate_impl(s: &str, max_chars: usize, suffix: &str) -> String {
    // Cheap filter: byte length <= max_chars implies char count is too.
    if s.len() <= max_chars {
        return s.to_string();
    }

    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s.to_string();
    }

    let suffix_len = suffix.chars().count();
    if max_chars <= suffix_len {
        return suffix.chars().take(max_chars).collect();
    }

    let truncated: String = s.chars().take(max_chars - suffix_len).collect();
    format!("{}{}", truncated, suffix)
}
