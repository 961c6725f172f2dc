use std::fmt::Write;

fn is_reserved(b: u8) -> bool {
    b < 32 || matches!(b, b'^' | b'<' | b'>' | b':' | b'"' | b'/' | b'\\' | b'|' | b'?' | b'*')
}

/// Replaces control characters and characters that are unsafe in file names with `^`
/// followed by two uppercase hex digits.
pub fn escape_file_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        match u8::try_from(c) {
            Ok(b) if is_reserved(b) => {
                let _ = write!(escaped, "^{b:02X}");
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_reserved_characters() {
        assert_eq!(escape_file_name("a/b:c*d"), "a^2Fb^3Ac^2Ad");
        assert_eq!(escape_file_name("x^y\n"), "x^5Ey^0A");
        assert_eq!(escape_file_name(r#"<>"\|?"#), "^3C^3E^22^5C^7C^3F");
    }

    #[test]
    fn leaves_other_characters_alone() {
        assert_eq!(escape_file_name("Memory~GetSet.0.html"), "Memory~GetSet.0.html");
        assert_eq!(escape_file_name("ключ→"), "ключ→");
    }
}
