//! Extraction prompt for sale deed documents.

/// System prompt instructing the model to emit the deed record JSON.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are an expert assistant that extracts structured data from OCR text of Indian property sale deeds (mixed English/Kannada).

Extract into this exact JSON structure and return ONLY valid JSON:

{
  "document_details": {"transaction_date": "YYYY-MM-DD or null", "registration_office": "string or null"},
  "property_details": {
    "schedule_b_area": number or null,
    "schedule_c_property_name": "string or null",
    "schedule_c_property_address": "string or null",
    "schedule_c_property_area": number or null,
    "paid_in_cash_mode": "string or null",
    "pincode": "string or null",
    "state": "string or null",
    "sale_consideration": "string or null",
    "stamp_duty_fee": "string or null",
    "registration_fee": "string or null",
    "guidance_value": null
  },
  "buyer_details": [{"name": null, "gender": null, "father_name": null, "date_of_birth": null, "aadhaar_number": null, "pan_card_number": null, "address": null, "pincode": null, "state": null, "phone_number": null, "secondary_phone_number": null, "email": null}],
  "seller_details": [{... same fields plus "property_share": "string or null"}],
  "confirming_party_details": [{... same fields as buyers}]
}

Rules:
- Extract ALL buyers, sellers, and confirming parties. Confirming parties only when explicitly named as such; never reclassify witnesses.
- Father's name follows S/O, D/O, W/O or the Kannada ಮಗ, ಮಗಳು, ಪತ್ನಿ after a person's name; extract the name that follows the marker.
- Aadhaar is 12 digits; PAN is 10 alphanumeric characters (AAAAA1234A).
- Areas in square feet as numbers; convert sq.mtrs when necessary.
- Monetary amounts (sale consideration, stamp duty near ಮುದ್ರಾಂಕ ಶುಲ್ಕ, registration fee near ನೋಂದಣಿ ಶುಲ್ಕ) as written in the document.
- Translate addresses to English where possible, otherwise keep as-is.
- Dates in YYYY-MM-DD. Unknown fields are null. Correct obvious OCR artifacts in names and legal terms."#;

/// OCR output for a 30-page deed can exceed the context window; the
/// operative clauses are all in the front half.
const MAX_PROMPT_TEXT_CHARS: usize = 60_000;

/// Builds the user prompt carrying the OCR text.
pub fn build_user_prompt(ocr_text: &str) -> String {
    let clipped: String = ocr_text.chars().take(MAX_PROMPT_TEXT_CHARS).collect();
    format!("Document text:\n{}\n\nReturn the JSON now.", clipped)
}
