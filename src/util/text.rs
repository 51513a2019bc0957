use std::borrow::Cow;

fn is_stripped_control(c: char) -> bool {
    c == '\u{7f}' || (c.is_control() && c != '\t' && c != '\n' && c != '\r')
}

/// Strip control characters (except tab, newline and carriage return) from text.
///
/// Feed titles and author names arrive from untrusted documents and are later
/// shown by the UI collaborator, so escape bytes and other C0/C1 controls are
/// dropped before anything is persisted.
///
/// Returns `Cow::Borrowed` when the input is already clean (common case).
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped_control) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|&c| !is_stripped_control(c)).collect())
}

/// Normalize a single-line label (title, author): strip control characters,
/// collapse internal whitespace runs to one space and trim the ends.
pub fn clean_label(s: &str) -> String {
    let stripped = strip_control_chars(s);
    let mut out = String::with_capacity(stripped.len());
    for word in stripped.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}
