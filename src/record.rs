//! The structured record extracted from a sale deed.
//!
//! The field names mirror the JSON contract the LLM is prompted to return,
//! so the whole record deserialises directly from the model response.
//! Monetary fields are kept as the original human-readable strings
//! (e.g. "Rs.28,62,413/-"); areas are numeric.

use serde::{Deserialize, Serialize};

/// Top-level extraction result for one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeedRecord {
    #[serde(default)]
    pub document_details: DocumentDetails,
    #[serde(default)]
    pub property_details: PropertyDetails,
    #[serde(default)]
    pub buyer_details: Vec<Party>,
    #[serde(default)]
    pub seller_details: Vec<Party>,
    #[serde(default)]
    pub confirming_party_details: Vec<Party>,
}

impl DeedRecord {
    /// A record with no parties and no property content cannot identify a
    /// transaction; Stage 2 routes such documents to failed.
    pub fn has_substance(&self) -> bool {
        !self.buyer_details.is_empty()
            || !self.seller_details.is_empty()
            || self.property_details.sale_consideration.is_some()
            || self.property_details.schedule_c_property_address.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentDetails {
    /// Transaction date as written in the deed (normalised to YYYY-MM-DD
    /// where the model manages it).
    pub transaction_date: Option<String>,
    pub registration_office: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyDetails {
    /// Schedule B area in square feet.
    pub schedule_b_area: Option<f64>,
    pub schedule_c_property_name: Option<String>,
    pub schedule_c_property_address: Option<String>,
    /// Schedule C area in square feet (super built-up preferred).
    pub schedule_c_property_area: Option<f64>,
    pub paid_in_cash_mode: Option<String>,
    pub pincode: Option<String>,
    pub state: Option<String>,
    pub sale_consideration: Option<String>,
    pub stamp_duty_fee: Option<String>,
    pub registration_fee: Option<String>,
    pub guidance_value: Option<String>,
}

/// A buyer, seller, or confirming party.
///
/// `property_share` is only meaningful for sellers; it deserialises as null
/// for the other roles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Party {
    pub name: Option<String>,
    pub gender: Option<String>,
    pub father_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub aadhaar_number: Option<String>,
    pub pan_card_number: Option<String>,
    pub address: Option<String>,
    pub pincode: Option<String>,
    pub state: Option<String>,
    pub phone_number: Option<String>,
    pub secondary_phone_number: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub property_share: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_full_record() {
        let json = r#"{
            "document_details": {
                "transaction_date": "2024-03-15",
                "registration_office": "Hebbal"
            },
            "property_details": {
                "schedule_b_area": 1200.5,
                "schedule_c_property_name": "Prestige Heights",
                "schedule_c_property_address": "12 MG Road, Bengaluru",
                "schedule_c_property_area": 1450.0,
                "paid_in_cash_mode": null,
                "pincode": "560001",
                "state": "Karnataka",
                "sale_consideration": "Rs.28,62,413/-",
                "stamp_duty_fee": "1,63,000",
                "registration_fee": "28624",
                "guidance_value": null
            },
            "buyer_details": [
                {"name": "John Doe", "gender": "Male", "father_name": "Richard Doe",
                 "date_of_birth": "1985-06-01", "aadhaar_number": "123456789012",
                 "pan_card_number": "ABCDE1234F", "address": "Bengaluru",
                 "pincode": "560001", "state": "Karnataka", "phone_number": null,
                 "secondary_phone_number": null, "email": null}
            ],
            "seller_details": [
                {"name": "Jane Smith", "property_share": "50%"}
            ],
            "confirming_party_details": []
        }"#;

        let record: DeedRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.buyer_details.len(), 1);
        assert_eq!(record.seller_details.len(), 1);
        assert_eq!(
            record.seller_details[0].property_share.as_deref(),
            Some("50%")
        );
        assert_eq!(record.property_details.schedule_b_area, Some(1200.5));
        assert_eq!(
            record.property_details.sale_consideration.as_deref(),
            Some("Rs.28,62,413/-")
        );
        assert!(record.has_substance());
    }

    #[test]
    fn test_missing_sections_default() {
        let record: DeedRecord = serde_json::from_str(r#"{"buyer_details": []}"#).unwrap();
        assert!(record.buyer_details.is_empty());
        assert!(record.document_details.transaction_date.is_none());
        assert!(!record.has_substance());
    }

    #[test]
    fn test_substance_from_property_only() {
        let mut record = DeedRecord::default();
        assert!(!record.has_substance());
        record.property_details.sale_consideration = Some("Rs.10,00,000".to_string());
        assert!(record.has_substance());
    }
}
