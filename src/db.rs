use crate::error::Result;
use crate::types::{CanonicalViolationRecord, ImageMetadata, OutOfStateRecord};
use chrono::{SecondsFormat, Utc};
use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS queue_message (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    message_id TEXT NOT NULL UNIQUE,
    body TEXT NOT NULL,
    visible_at INTEGER NOT NULL,
    receipt_handle TEXT,
    receive_count INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS queue_message_visible ON queue_message(queue, visible_at);
CREATE TABLE IF NOT EXISTS violation (
    plate TEXT NOT NULL,
    captured_at TEXT NOT NULL,
    image_ref TEXT NOT NULL,
    jurisdiction TEXT NOT NULL,
    location TEXT NOT NULL,
    violation_type TEXT NOT NULL,
    fine_amount TEXT NOT NULL,
    owner TEXT NOT NULL,
    email TEXT NOT NULL,
    vehicle TEXT NOT NULL,
    stored_at TEXT NOT NULL,
    notified INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (plate, captured_at, image_ref)
) WITHOUT ROWID;
CREATE TABLE IF NOT EXISTS out_of_state_violation (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    plate TEXT NOT NULL,
    jurisdiction TEXT NOT NULL,
    detected_text TEXT NOT NULL,
    captured_at TEXT NOT NULL,
    location TEXT NOT NULL,
    violation_type TEXT NOT NULL,
    fine_amount TEXT NOT NULL,
    image_ref TEXT NOT NULL,
    processed_at TEXT NOT NULL
);
";

pub type SharedConnection = Arc<Mutex<Connection>>;

/// Opens the database and creates any missing tables.
pub fn open(path: &Path) -> Result<SharedConnection> {
    let conn = Connection::open(path)?;
    init(conn)
}

pub fn open_in_memory() -> Result<SharedConnection> {
    init(Connection::open_in_memory()?)
}

fn init(conn: Connection) -> Result<SharedConnection> {
    conn.execute_batch(SCHEMA)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Append-only violation tables.
#[derive(Clone)]
pub struct ViolationStore {
    conn: SharedConnection,
}

impl ViolationStore {
    pub fn new(conn: SharedConnection) -> Self {
        ViolationStore { conn }
    }

    /// Returns false when a row with the same plate, capture time and image
    /// already exists (a redelivered record); the stored row is left untouched.
    pub async fn insert_violation(&self, record: &CanonicalViolationRecord) -> Result<bool> {
        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO violation (plate, captured_at, image_ref, jurisdiction, location,
                violation_type, fine_amount, owner, email, vehicle, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.plate,
                record.captured_at,
                record.image_ref,
                record.jurisdiction,
                record.location,
                record.violation_type,
                record.fine_amount,
                record.owner,
                record.email,
                record.vehicle,
                Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        if inserted == 0 {
            warn!(
                "Violation for plate {} at {} already stored, ignoring duplicate",
                record.plate, record.captured_at
            );
        } else {
            info!("Stored violation for plate {}", record.plate);
        }
        Ok(inserted > 0)
    }

    /// True while the stored row has no owner notice recorded against it.
    pub async fn notice_pending(&self, record: &CanonicalViolationRecord) -> Result<bool> {
        let conn = self.conn.lock().await;
        let notified: Option<bool> = conn
            .query_row(
                "SELECT notified FROM violation
                 WHERE plate = ?1 AND captured_at = ?2 AND image_ref = ?3",
                params![record.plate, record.captured_at, record.image_ref],
                |row| row.get(0),
            )
            .optional()?;
        Ok(notified == Some(false))
    }

    pub async fn mark_notified(&self, record: &CanonicalViolationRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE violation SET notified = 1
             WHERE plate = ?1 AND captured_at = ?2 AND image_ref = ?3",
            params![record.plate, record.captured_at, record.image_ref],
        )?;
        Ok(())
    }

    pub async fn insert_out_of_state(&self, record: &OutOfStateRecord) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO out_of_state_violation (plate, jurisdiction, detected_text, captured_at,
                location, violation_type, fine_amount, image_ref, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.plate,
                record.jurisdiction,
                record.detected_text,
                record.metadata.captured_at,
                record.metadata.location,
                record.metadata.violation_type,
                record.metadata.fine_amount,
                record.image_ref,
                record.processed_at,
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(
            "Stored out-of-state violation {} for plate {} ({})",
            id, record.plate, record.jurisdiction
        );
        Ok(id)
    }

    pub async fn violations_for_plate(&self, plate: &str) -> Result<Vec<CanonicalViolationRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT plate, jurisdiction, captured_at, location, violation_type, fine_amount,
                image_ref, owner, email, vehicle
             FROM violation WHERE plate = ?1 ORDER BY stored_at, captured_at",
        )?;
        let rows = stmt.query_map(params![plate], violation_from_row)?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub async fn out_of_state_for_plate(&self, plate: &str) -> Result<Vec<OutOfStateRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT plate, jurisdiction, detected_text, captured_at, location, violation_type,
                fine_amount, image_ref, processed_at
             FROM out_of_state_violation WHERE plate = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![plate], |row| {
            Ok(OutOfStateRecord {
                plate: row.get(0)?,
                jurisdiction: row.get(1)?,
                detected_text: row.get(2)?,
                metadata: ImageMetadata {
                    captured_at: row.get(3)?,
                    location: row.get(4)?,
                    violation_type: row.get(5)?,
                    fine_amount: row.get(6)?,
                },
                image_ref: row.get(7)?,
                processed_at: row.get(8)?,
            })
        })?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

fn violation_from_row(row: &Row) -> rusqlite::Result<CanonicalViolationRecord> {
    Ok(CanonicalViolationRecord {
        plate: row.get(0)?,
        jurisdiction: row.get(1)?,
        captured_at: row.get(2)?,
        location: row.get(3)?,
        violation_type: row.get(4)?,
        fine_amount: row.get(5)?,
        image_ref: row.get(6)?,
        owner: row.get(7)?,
        email: row.get(8)?,
        vehicle: row.get(9)?,
    })
}
