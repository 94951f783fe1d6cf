//! Formatting utilities for Telegram parse modes.

/// Characters that carry meaning in Telegram `MarkdownV2` and must be escaped
/// in plain text.
pub const MARKDOWN_V2_SPECIAL: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

/// Escape plain text for Telegram `MarkdownV2` parse mode.
///
/// Every character in [`MARKDOWN_V2_SPECIAL`] gets a preceding backslash; all
/// other characters (backslash included) pass through untouched. Applying it
/// twice is not idempotent.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    for ch in text.chars() {
        if MARKDOWN_V2_SPECIAL.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
