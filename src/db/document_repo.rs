//! Document repository.
//!
//! `upsert_document` writes the document, its property, and all party rows
//! in one transaction, idempotent by `document_id`: the document row is
//! upserted, children are deleted and re-inserted (last writer wins).

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{params, Connection, Row};

use crate::error::ErrorKind;
use crate::record::{DeedRecord, Party};

use super::{Database, DatabaseError};

/// A document row, without its children.
#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub document_id: String,
    pub batch_id: Option<String>,
    pub transaction_date: Option<String>,
    pub registration_office: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl DocumentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            document_id: row.get("document_id")?,
            batch_id: row.get("batch_id")?,
            transaction_date: row.get("transaction_date")?,
            registration_office: row.get("registration_office")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// A recorded processing failure.
#[derive(Debug, Clone)]
pub struct FailureRow {
    pub document_id: String,
    pub batch_id: String,
    pub error_kind: String,
    pub diagnostic: Option<String>,
    pub attempt: u32,
    pub created_at: String,
}

/// Writes the full extracted record for a document in one transaction.
pub fn upsert_document(
    db: &Database,
    document_id: &str,
    batch_id: &str,
    record: &DeedRecord,
) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();

    db.with_conn(|conn| {
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO documents (document_id, batch_id, transaction_date,
             registration_office, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(document_id) DO UPDATE SET
               batch_id = excluded.batch_id,
               transaction_date = excluded.transaction_date,
               registration_office = excluded.registration_office,
               updated_at = excluded.updated_at",
            params![
                document_id,
                batch_id,
                record.document_details.transaction_date,
                record.document_details.registration_office,
                now,
            ],
        )?;

        // Children are replaced wholesale so a re-run cannot leave stale rows.
        tx.execute(
            "DELETE FROM properties WHERE document_id = ?1",
            params![document_id],
        )?;
        tx.execute(
            "DELETE FROM buyers WHERE document_id = ?1",
            params![document_id],
        )?;
        tx.execute(
            "DELETE FROM sellers WHERE document_id = ?1",
            params![document_id],
        )?;
        tx.execute(
            "DELETE FROM confirming_parties WHERE document_id = ?1",
            params![document_id],
        )?;

        let prop = &record.property_details;
        tx.execute(
            "INSERT INTO properties (document_id, schedule_b_area,
             schedule_c_property_name, schedule_c_property_address,
             schedule_c_property_area, paid_in_cash_mode, pincode, state,
             sale_consideration, stamp_duty_fee, registration_fee, guidance_value)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                document_id,
                prop.schedule_b_area,
                prop.schedule_c_property_name,
                prop.schedule_c_property_address,
                prop.schedule_c_property_area,
                prop.paid_in_cash_mode,
                prop.pincode,
                prop.state,
                prop.sale_consideration,
                prop.stamp_duty_fee,
                prop.registration_fee,
                prop.guidance_value,
            ],
        )?;

        for buyer in &record.buyer_details {
            insert_party(&tx, "buyers", document_id, buyer, false)?;
        }
        for seller in &record.seller_details {
            insert_party(&tx, "sellers", document_id, seller, true)?;
        }
        for party in &record.confirming_party_details {
            insert_party(&tx, "confirming_parties", document_id, party, false)?;
        }

        tx.commit()?;
        Ok(())
    })
}

fn insert_party(
    tx: &Connection,
    table: &str,
    document_id: &str,
    party: &Party,
    with_share: bool,
) -> Result<(), rusqlite::Error> {
    // Table names come from a fixed in-crate set, never from input.
    if with_share {
        tx.execute(
            &format!(
                "INSERT INTO {} (document_id, name, gender, father_name, date_of_birth,
                 aadhaar_number, pan_card_number, address, pincode, state,
                 phone_number, secondary_phone_number, email, property_share)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                table
            ),
            params![
                document_id,
                party.name,
                party.gender,
                party.father_name,
                party.date_of_birth,
                party.aadhaar_number,
                party.pan_card_number,
                party.address,
                party.pincode,
                party.state,
                party.phone_number,
                party.secondary_phone_number,
                party.email,
                party.property_share,
            ],
        )?;
    } else {
        tx.execute(
            &format!(
                "INSERT INTO {} (document_id, name, gender, father_name, date_of_birth,
                 aadhaar_number, pan_card_number, address, pincode, state,
                 phone_number, secondary_phone_number, email)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                table
            ),
            params![
                document_id,
                party.name,
                party.gender,
                party.father_name,
                party.date_of_birth,
                party.aadhaar_number,
                party.pan_card_number,
                party.address,
                party.pincode,
                party.state,
                party.phone_number,
                party.secondary_phone_number,
                party.email,
            ],
        )?;
    }
    Ok(())
}

/// Finds a document by its ID.
pub fn find_by_id(db: &Database, document_id: &str) -> Result<Option<DocumentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM documents WHERE document_id = ?1")?;
        let mut rows = stmt.query_map(params![document_id], DocumentRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Counts of (buyers, sellers, confirming parties) for a document.
pub fn party_counts(db: &Database, document_id: &str) -> Result<(u32, u32, u32), DatabaseError> {
    db.with_conn(|conn| {
        let count = |table: &str| -> Result<u32, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE document_id = ?1", table),
                params![document_id],
                |r| r.get(0),
            )
        };
        Ok((count("buyers")?, count("sellers")?, count("confirming_parties")?))
    })
}

/// The stored registration fee for a document, if any.
pub fn registration_fee(
    db: &Database,
    document_id: &str,
) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT registration_fee FROM properties WHERE document_id = ?1")?;
        let mut rows = stmt.query_map(params![document_id], |r| r.get::<_, Option<String>>(0))?;
        match rows.next() {
            Some(Ok(fee)) => Ok(fee),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Records a processing failure for a document.
pub fn record_failure(
    db: &Database,
    document_id: &str,
    batch_id: &str,
    kind: ErrorKind,
    diagnostic: &str,
    attempt: u32,
) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO failures (document_id, batch_id, error_kind, diagnostic,
             attempt, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![document_id, batch_id, kind.as_str(), diagnostic, attempt, now],
        )?;
        Ok(())
    })
}

/// Failed document ids grouped by batch, for the retry surface.
pub fn failed_by_batch(db: &Database) -> Result<BTreeMap<String, Vec<String>>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT batch_id, document_id FROM failures
             ORDER BY batch_id, document_id",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;

        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in rows {
            let (batch_id, document_id) = row?;
            grouped.entry(batch_id).or_default().push(document_id);
        }
        Ok(grouped)
    })
}

/// Highest recorded attempt for a document, 0 if it never failed.
pub fn latest_attempt(db: &Database, document_id: &str) -> Result<u32, DatabaseError> {
    db.with_conn(|conn| {
        let attempt: u32 = conn.query_row(
            "SELECT COALESCE(MAX(attempt), 0) FROM failures WHERE document_id = ?1",
            params![document_id],
            |r| r.get(0),
        )?;
        Ok(attempt)
    })
}

/// All failures for a batch, newest first.
pub fn failures_for_batch(
    db: &Database,
    batch_id: &str,
) -> Result<Vec<FailureRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT document_id, batch_id, error_kind, diagnostic, attempt, created_at
             FROM failures WHERE batch_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let rows: Vec<FailureRow> = stmt
            .query_map(params![batch_id], |r| {
                Ok(FailureRow {
                    document_id: r.get(0)?,
                    batch_id: r.get(1)?,
                    error_kind: r.get(2)?,
                    diagnostic: r.get(3)?,
                    attempt: r.get(4)?,
                    created_at: r.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
