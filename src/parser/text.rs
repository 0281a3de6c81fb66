/// Decodes UTF-8, falling back to Latin-1 where every byte maps to one char. Never fails.
pub fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.strip_prefix('\u{feff}').unwrap_or(text).to_string(),
        Err(_) => bytes.iter().map(|&byte| byte as char).collect(),
    }
}
