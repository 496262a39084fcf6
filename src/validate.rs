//! Post-extraction validation and cleanup.
//!
//! Field-level shape checks null individual fields; the record survives.
//! Only a record with no transaction substance at all (no parties, no
//! property) is rejected. Monetary strings keep their original human form.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use thiserror::Error;

use crate::extract::fee_scan::{parse_amount, MIN_REGISTRATION_FEE};
use crate::record::{DeedRecord, Party};

#[derive(Error, Debug)]
#[error("validation failed: {0}")]
pub struct ValidationError(pub String);

/// Registration fee in Karnataka is 1% of the consideration value; the
/// guidance value is recovered by inverting that rate.
const REGISTRATION_FEE_RATE: f64 = 0.01;

fn pan_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z]{5}[0-9]{4}[A-Z]$").expect("pan pattern is valid"))
}

/// Markers that introduce a father's (or husband's) name. `ಮಗಳು` precedes
/// `ಮಗ` in the alternation so the longer marker wins.
fn relation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(?:son of|daughter of|wife of|s/o|d/o|w/o)\b|ಮಗಳು|ಮಗ|ಪತ್ನಿ")
            .expect("relation pattern is valid")
    })
}

/// Cleans a freshly parsed record in place.
///
/// `ocr_fee` is the Stage-1 fee pre-scan result; when present it overrides
/// whatever the model extracted.
pub fn clean(record: &mut DeedRecord, ocr_fee: Option<f64>) -> Result<(), ValidationError> {
    for party in record
        .buyer_details
        .iter_mut()
        .chain(record.seller_details.iter_mut())
        .chain(record.confirming_party_details.iter_mut())
    {
        clean_party(party);
    }

    let prop = &mut record.property_details;
    prop.sale_consideration = normalize_money(prop.sale_consideration.take());
    prop.stamp_duty_fee = normalize_money(prop.stamp_duty_fee.take());
    prop.registration_fee = normalize_money(prop.registration_fee.take());
    prop.paid_in_cash_mode = normalize_text(prop.paid_in_cash_mode.take());

    reconcile_registration_fee(record, ocr_fee);

    if !record.has_substance() {
        return Err(ValidationError(
            "record has no parties and no property details".to_string(),
        ));
    }

    Ok(())
}

fn clean_party(party: &mut Party) {
    party.name = normalize_text(party.name.take());
    party.aadhaar_number = normalize_aadhaar(party.aadhaar_number.take());
    party.pan_card_number = normalize_pan(party.pan_card_number.take());
    party.date_of_birth = normalize_date(party.date_of_birth.take());
    party.property_share = normalize_text(party.property_share.take());

    // The model often leaves father_name empty even when the deed spells it
    // out next to the person's name.
    if party.father_name.is_none() {
        if let Some(name) = &party.name {
            if let Some((clean_name, father)) = split_relation(name) {
                party.name = Some(clean_name);
                party.father_name = Some(father);
            }
        }
    }
    party.father_name = normalize_text(party.father_name.take());
}

/// Aadhaar must be exactly 12 digits once separators are stripped.
pub fn normalize_aadhaar(value: Option<String>) -> Option<String> {
    let raw = value?;
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let separators_only = raw
        .chars()
        .all(|c| c.is_ascii_digit() || c.is_whitespace() || c == '-');
    if digits.len() == 12 && separators_only {
        Some(digits)
    } else {
        None
    }
}

/// PAN must match `AAAAA9999A` after uppercasing.
pub fn normalize_pan(value: Option<String>) -> Option<String> {
    let raw = value?;
    let candidate: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    if pan_pattern().is_match(&candidate) {
        Some(candidate)
    } else {
        None
    }
}

/// Dates must already be `YYYY-MM-DD`; anything else is nulled.
pub fn normalize_date(value: Option<String>) -> Option<String> {
    let raw = value?;
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .map(|_| trimmed.to_string())
}

fn normalize_text(value: Option<String>) -> Option<String> {
    let raw = value?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Trims a monetary string, preserving its human form.
pub fn normalize_money(value: Option<String>) -> Option<String> {
    normalize_text(value)
}

/// Splits "Name S/O Father" (or a Kannada equivalent) into name and father.
pub fn split_relation(name: &str) -> Option<(String, String)> {
    let m = relation_pattern().find(name)?;
    let before = name[..m.start()].trim_end_matches([',', ' ', '.']).trim();
    let after = name[m.end()..].trim_start_matches(['.', ':', ' ']).trim();
    let after = after.trim_end_matches([',', '.']).trim();
    if before.is_empty() || after.is_empty() {
        return None;
    }
    Some((before.to_string(), after.to_string()))
}

/// Fee priority: the Stage-1 OCR scan wins; otherwise the model's value
/// survives only if it is plausible. A fee equal to the sale consideration
/// is a column misread, and one under three digits is below the statutory
/// minimum; both are nulled. The guidance value is derived from whatever
/// fee survives.
fn reconcile_registration_fee(record: &mut DeedRecord, ocr_fee: Option<f64>) {
    let prop = &mut record.property_details;

    let final_fee = if let Some(fee) = ocr_fee {
        Some(fee)
    } else {
        let llm_fee = prop
            .registration_fee
            .as_deref()
            .and_then(extract_numeric_amount);
        match llm_fee {
            Some(fee) if fee < MIN_REGISTRATION_FEE => None,
            Some(fee) => {
                let consideration = prop
                    .sale_consideration
                    .as_deref()
                    .and_then(extract_numeric_amount);
                match consideration {
                    Some(total) if total > 0.0 && (fee / total - 1.0).abs() < f64::EPSILON => {
                        None
                    }
                    _ => Some(fee),
                }
            }
            None => None,
        }
    };

    match final_fee {
        Some(fee) => {
            prop.registration_fee = Some(format_amount(fee));
            prop.guidance_value = Some(format_amount(fee / REGISTRATION_FEE_RATE));
        }
        None => {
            prop.registration_fee = None;
            prop.guidance_value = None;
        }
    }
}

/// Pulls the numeric amount out of a human-formatted money string, e.g.
/// "Rs.28,62,413/-" -> 2862413.
pub fn extract_numeric_amount(raw: &str) -> Option<f64> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"[0-9][0-9,]*(?:\.[0-9]{1,2})?").expect("amount pattern"));
    let m = pattern.find(raw)?;
    parse_amount(m.as_str())
}

/// Whole amounts render without decimals, fractional ones with two.
pub fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}
