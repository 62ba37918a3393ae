//! CRUD operations for [`Label`] records.

use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::{Label, LabelKind};

impl Database {
    /// List all labels, ordered by their explicit sort key.
    pub fn labels(&self) -> Result<Vec<Label>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, name, kind, color, ord FROM labels ORDER BY ord ASC")?;

        let rows = stmt.query_map([], row_to_label)?;

        let mut labels = Vec::new();
        for row in rows {
            labels.push(row?);
        }
        Ok(labels)
    }

    /// Look up a well-known label by its role.
    pub fn label_by_kind(&self, kind: LabelKind) -> Result<Option<Label>> {
        let result = self.conn().query_row(
            "SELECT id, name, kind, color, ord FROM labels WHERE kind = ?1",
            params![kind.as_str()],
            row_to_label,
        );

        match result {
            Ok(label) => Ok(Some(label)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(other.into()),
        }
    }

    /// Insert a user-defined label and assign its id.
    pub fn insert_label(&self, label: &mut Label) -> Result<()> {
        self.conn().execute(
            "INSERT INTO labels (name, kind, color, ord) VALUES (?1, ?2, ?3, ?4)",
            params![
                label.name,
                label.kind.map(LabelKind::as_str),
                label.color,
                label.ord,
            ],
        )?;
        label.id = Some(self.conn().last_insert_rowid());
        Ok(())
    }

    /// Delete a label by id; its message links go with it. Returns `true` if
    /// a row was deleted.
    pub fn delete_label(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM labels WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Label`].
pub(crate) fn row_to_label(row: &rusqlite::Row<'_>) -> rusqlite::Result<Label> {
    let id: i64 = row.get(0)?;
    let name: String = row.get(1)?;
    let kind_str: Option<String> = row.get(2)?;
    let color: u32 = row.get(3)?;
    let ord: i64 = row.get(4)?;

    let kind = kind_str.as_deref().and_then(LabelKind::from_str);

    Ok(Label {
        id: Some(id),
        name,
        kind,
        color,
        ord,
    })
}
