//! CRUD operations for [`NetworkObject`] records (the durable inventory).
//!
//! All side effects here are confined to SQLite; the in-memory overlay lives
//! in [`crate::inventory`].

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::{InventoryVector, NetworkObject, ObjectKind};

impl Database {
    /// Fetch an object by its inventory vector.
    ///
    /// Returns `Ok(None)` on a miss; probing for objects we may not have is a
    /// normal part of inventory exchange, not an error.
    pub fn object(&self, vector: InventoryVector) -> Result<Option<NetworkObject>> {
        let result = self.conn().query_row(
            "SELECT vector, stream, expires_at, version, kind, payload
             FROM objects WHERE vector = ?1",
            params![vector.to_hex()],
            row_to_object,
        );

        match result {
            Ok(obj) => Ok(Some(obj)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(other.into()),
        }
    }

    /// Insert a new object.
    ///
    /// Returns `false` when an object with the same vector already exists:
    /// duplicate announcements are routine, so the conflict is logged and
    /// swallowed rather than propagated.
    pub fn insert_object(&self, object: &NetworkObject) -> Result<bool> {
        let result = self.conn().execute(
            "INSERT INTO objects (vector, stream, expires_at, version, kind, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                object.vector.to_hex(),
                object.stream,
                object.expires_at.to_rfc3339(),
                object.version,
                object.kind.as_u32(),
                object.payload,
            ],
        );

        match result {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                tracing::debug!(vector = %object.vector, "object already stored, ignoring");
                Ok(false)
            }
            Err(other) => Err(other.into()),
        }
    }

    /// List objects in a stream, optionally narrowed by version and kind.
    pub fn objects(
        &self,
        stream: u32,
        version: Option<u32>,
        kind: Option<ObjectKind>,
    ) -> Result<Vec<NetworkObject>> {
        let mut stmt = self.conn().prepare(
            "SELECT vector, stream, expires_at, version, kind, payload
             FROM objects
             WHERE stream = ?1
               AND (?2 IS NULL OR version = ?2)
               AND (?3 IS NULL OR kind = ?3)",
        )?;

        let rows = stmt.query_map(
            params![stream, version, kind.map(ObjectKind::as_u32)],
            row_to_object,
        )?;

        let mut objects = Vec::new();
        for row in rows {
            objects.push(row?);
        }
        Ok(objects)
    }

    /// The `(vector, expires_at)` projection of a stream, used to warm the
    /// in-memory inventory index without dragging payloads through memory.
    pub fn stream_inventory(
        &self,
        stream: u32,
    ) -> Result<Vec<(InventoryVector, DateTime<Utc>)>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT vector, expires_at FROM objects WHERE stream = ?1")?;

        let rows = stmt.query_map(params![stream], |row| {
            let vector_hex: String = row.get(0)?;
            let expires_str: String = row.get(1)?;

            let vector = InventoryVector::from_hex(&vector_hex).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            let expires_at = parse_timestamp(&expires_str, 1)?;

            Ok((vector, expires_at))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Delete all objects whose expiry is older than `cutoff`.
    ///
    /// Returns the number of rows removed. This is the table-scan half of
    /// [`Inventory::cleanup`](crate::inventory::Inventory::cleanup); callers
    /// run it periodically, not per operation.
    pub fn delete_expired_objects(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM objects WHERE expires_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;

        if removed > 0 {
            tracing::info!(removed, cutoff = %cutoff, "expired objects deleted");
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`NetworkObject`].
fn row_to_object(row: &rusqlite::Row<'_>) -> rusqlite::Result<NetworkObject> {
    let vector_hex: String = row.get(0)?;
    let stream: u32 = row.get(1)?;
    let expires_str: String = row.get(2)?;
    let version: u32 = row.get(3)?;
    let kind_code: u32 = row.get(4)?;
    let payload: Vec<u8> = row.get(5)?;

    let vector = InventoryVector::from_hex(&vector_hex).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let expires_at = parse_timestamp(&expires_str, 2)?;

    let kind = ObjectKind::from_u32(kind_code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Integer,
            format!("unknown object kind {kind_code}").into(),
        )
    })?;

    Ok(NetworkObject {
        vector,
        stream,
        expires_at,
        version,
        kind,
        payload,
    })
}

/// Parse an RFC-3339 column value, reporting the column index on failure.
pub(crate) fn parse_timestamp(value: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}
