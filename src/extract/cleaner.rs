//! OCR text filter.
//!
//! Tesseract output for mixed English/Kannada scans carries artifacts from
//! other scripts and stray symbols. The filter keeps only the characters the
//! downstream extraction can use: the Kannada block, ASCII letters and
//! digits, `, . -`, spaces, and newlines.

const KANNADA_START: u32 = 0x0C80;
const KANNADA_END: u32 = 0x0CFF;

fn is_allowed(c: char) -> bool {
    if matches!(c, ',' | '.' | '-' | ' ' | '\n' | '\r') {
        return true;
    }
    if c.is_ascii_alphanumeric() {
        return true;
    }
    let code = c as u32;
    (KANNADA_START..=KANNADA_END).contains(&code)
}

/// Strips every character outside the allowed set.
pub fn clean_text(text: &str) -> String {
    text.chars().filter(|c| is_allowed(*c)).collect()
}
