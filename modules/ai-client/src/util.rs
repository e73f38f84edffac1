/// Truncate a string to at most `max_bytes` bytes at a character boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_multibyte_boundaries() {
        let text = "anti-PD-1 抗体";
        let cut = truncate_to_char_boundary(text, 12);
        assert!(cut.len() <= 12);
        assert!(text.starts_with(cut));
    }

    #[test]
    fn short_strings_are_untouched() {
        assert_eq!(truncate_to_char_boundary("KRAS", 100), "KRAS");
    }
}
