/// Strips ASCII and C1 control characters and trims surrounding
/// whitespace. Map names are aggregation keys, so two spellings that
/// differ only in embedded control bytes must collapse to one key.
pub fn sanitize_map_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| !is_control(*c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Like [`sanitize_map_name`] but also drops block-element glyphs
/// (U+2580..=U+259F), which some servers abuse for banner art in their
/// advertised names.
pub fn sanitize_server_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| !is_control(*c) && !matches!(*c, '\u{2580}'..='\u{259F}'))
        .collect::<String>()
        .trim()
        .to_string()
}

fn is_control(c: char) -> bool {
    matches!(c, '\u{0000}'..='\u{001F}' | '\u{007F}'..='\u{009F}')
}
