/// Grouping key for an error message: whitespace collapsed, truncated to
/// `max_chars` characters.
pub fn error_signature(message: &str, max_chars: usize) -> String {
    let mut compact = String::new();
    for part in message.split_whitespace() {
        if !compact.is_empty() {
            compact.push(' ');
        }
        compact.push_str(part);
    }

    if compact.is_empty() {
        return "unknown".to_string();
    }

    let truncated: String = compact.chars().take(max_chars.max(1)).collect();
    truncated.trim_end().to_string()
}
