use std::path::Path;

fn extension_lower(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

pub fn is_markdown_file(path: &Path) -> bool {
    matches!(extension_lower(path).as_str(), "md" | "markdown")
}

pub fn is_pdf_file(path: &Path) -> bool {
    extension_lower(path) == "pdf"
}

/// Cut `text` to at most `max_chars` characters, never inside a character.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}
