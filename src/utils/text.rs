//! Arabic-aware text processing utilities.

/// Minimum non-whitespace characters for meaningful content.
pub const MIN_CONTENT_LENGTH: usize = 20;

/// Check if content has meaningful text (not just whitespace/punctuation).
pub fn has_meaningful_content(content: &str) -> bool {
    content.chars().filter(|c| !c.is_whitespace()).count() >= MIN_CONTENT_LENGTH
}

/// Normalize Arabic text for embedding: strip tashkeel (diacritics) and
/// tatweel, and collapse runs of whitespace. Stored chunk text is left
/// untouched; only the embedding input is normalized, so the same chunk
/// always embeds to the same vector regardless of vocalization.
pub fn normalize_arabic(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for c in text.chars() {
        if is_tashkeel(c) || c == '\u{0640}' {
            // tatweel
            continue;
        }
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
            continue;
        }
        out.push(c);
        last_was_space = false;
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Arabic diacritic marks (fathatan through sukun, plus superscript alef).
fn is_tashkeel(c: char) -> bool {
    matches!(c, '\u{064B}'..='\u{0652}' | '\u{0670}')
}
