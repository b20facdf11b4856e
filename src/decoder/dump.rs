//! Hex dumps of raw blocks for diagnostics

use std::fmt::Write;

/// Words per dump line
pub const WORDS_PER_LINE: usize = 8;

/// Format words as a hex dump, 8 words per line with the word index
pub fn hex_dump(words: &[u32]) -> String {
    let mut out = String::with_capacity(words.len() * 9 + words.len() / WORDS_PER_LINE * 8 + 8);
    for (line, chunk) in words.chunks(WORDS_PER_LINE).enumerate() {
        let _ = write!(out, "{:6}:", line * WORDS_PER_LINE);
        for word in chunk {
            let _ = write!(out, " {:08x}", word);
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_dump_empty() {
        assert_eq!(hex_dump(&[]), "");
    }

    #[test]
    fn test_hex_dump_line_layout() {
        let words: Vec<u32> = (0..10).collect();
        let dump = hex_dump(&words);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("     0: 00000000 00000001"));
        assert_eq!(lines[1], "     8: 00000008 00000009");
    }
}
