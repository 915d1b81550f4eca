use std::sync::LazyLock;

use regex::Regex;

/// URLs, markdown link targets and HTML entities. Never scanned for symbols.
static NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://\S+|www\.\S+|\]\([^)]*\)|&#?\w{1,8};").expect("valid noise pattern")
});

/// A maximal letter/digit run, with the `$` immediately before it if any.
static WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\$)?([\p{Alphabetic}\p{N}]+)").expect("valid word pattern")
});

/// A maximal alphanumeric run in normalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    /// Character offset of the first character.
    pub start: usize,
    /// Character offset one past the last character.
    pub end: usize,
    /// A `$` sits immediately before the run.
    pub cashtag: bool,
}

/// Tokenizes `text` after blanking URLs, markdown link targets and HTML
/// entities. Offsets are character offsets into the original text.
pub fn tokenize(text: &str) -> std::vec::IntoIter<Token> {
    let clean = blank_noise(text);
    let mut tokens = Vec::new();
    // Matches arrive in order, so byte -> char conversion is a running count.
    let mut byte_at = 0usize;
    let mut char_at = 0usize;
    for caps in WORD.captures_iter(&clean) {
        let Some(word) = caps.get(2) else { continue };
        char_at += clean[byte_at..word.start()].chars().count();
        let len = word.as_str().chars().count();
        tokens.push(Token {
            text: word.as_str().to_string(),
            start: char_at,
            end: char_at + len,
            cashtag: caps.get(1).is_some(),
        });
        char_at += len;
        byte_at = word.end();
    }
    tokens.into_iter()
}

/// Replaces every character of a noise span with one space, so character
/// offsets of the result match the input.
fn blank_noise(text: &str) -> String {
    NOISE
        .replace_all(text, |caps: &regex::Captures| " ".repeat(caps[0].chars().count()))
        .into_owned()
}

/// Up to `radius` characters either side of `[start, end)`, whitespace-trimmed.
pub fn context_window(chars: &[char], start: usize, end: usize, radius: usize) -> String {
    let from = start.saturating_sub(radius);
    let to = (end + radius).min(chars.len());
    let window: String = chars[from..to].iter().collect();
    window.trim().to_string()
}
