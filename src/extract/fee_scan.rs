//! Registration-fee pre-scan over Stage-1 OCR text.
//!
//! Deeds print the registration fee in a fee table near the Kannada label
//! "ನೋಂದಣಿ ಶುಲ್ಕ" or the English "registration fee". Finding it here, from
//! the OCR text itself, beats asking the LLM: the number is verbatim on the
//! page. The scanned value rides on the `StageResult` and takes priority in
//! Stage-2 reconciliation.

use std::sync::OnceLock;

use regex::Regex;

/// Fees below this are stamp-vendor miscellanea, not the registration fee.
pub const MIN_REGISTRATION_FEE: f64 = 100.0;

fn label_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // A fee label followed within a short window by an amount with
        // optional Indian digit grouping and decimals.
        Regex::new(
            r"(?i)(?:registration\s*fee|ನೋಂದಣಿ\s*ಶುಲ್ಕ|ನೊಂದಣಿ\s*ಶುಲ್ಕ)[^0-9]{0,40}([0-9][0-9,]*(?:\.[0-9]{1,2})?)",
        )
        .expect("fee pattern is valid")
    })
}

/// Scans OCR text for a registration-fee amount.
///
/// Returns the first labelled amount at or above [`MIN_REGISTRATION_FEE`];
/// smaller labelled values are skipped as table noise.
pub fn scan_registration_fee(text: &str) -> Option<f64> {
    for capture in label_pattern().captures_iter(text) {
        let raw = capture.get(1)?.as_str();
        if let Some(value) = parse_amount(raw) {
            if value >= MIN_REGISTRATION_FEE {
                return Some(value);
            }
        }
    }
    None
}

/// Parses an amount with optional comma grouping, e.g. "28,624.50".
pub fn parse_amount(raw: &str) -> Option<f64> {
    let digits: String = raw.chars().filter(|c| *c != ',').collect();
    digits.parse::<f64>().ok()
}
