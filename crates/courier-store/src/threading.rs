//! Conversation threading.
//!
//! Messages reference their parents by the inventory vector the parent was
//! transmitted as, and parents and children arrive in any order. Linking runs
//! inside the same transaction as the message save and converges every
//! transitively connected message onto one conversation id by relabeling:
//! when two conversations turn out to be the same thread, every message row
//! and edge row carrying the losing id is rewritten to the winning id.
//!
//! A full relabel instead of union-find is deliberate. At personal-mailbox
//! scale the UPDATE touches a handful of rows, and it keeps conversation_id
//! directly queryable on every row with no deferred resolution step.
//!
//! Edge rows are keyed by vectors and persist even when the parent message
//! has not arrived. That makes linking order-independent: a child saved
//! before its parent leaves an edge behind, and the parent picks it up on
//! arrival.

use rusqlite::{params, Transaction};
use uuid::Uuid;

use crate::error::Result;
use crate::models::Message;

/// Merge the message's conversation with those of its resolvable parents and
/// of any already-stored children waiting on it.
///
/// Updates `message.conversation_id` in place to the final merged id. The
/// caller persists the message row before calling this, so the relabel
/// UPDATEs cover it too. Messages without an inventory vector (unsent drafts)
/// cannot participate in edges and are skipped.
pub(crate) fn link(tx: &Transaction<'_>, message: &mut Message) -> Result<()> {
    let Some(child_vector) = message.inventory_vector else {
        return Ok(());
    };

    // Merge towards each resolvable parent, in the order the message lists
    // them. Unresolved parents are skipped; their edge rows (written by the
    // caller afterwards) re-link when they arrive. The last merge processed
    // wins, which is fine: merges are idempotent and the id graph is
    // undirected.
    for parent in &message.parents {
        if let Some(parent_conversation) = conversation_of(tx, parent.to_hex())? {
            if parent_conversation != message.conversation_id {
                tracing::debug!(
                    from = %message.conversation_id,
                    into = %parent_conversation,
                    "merging conversations"
                );
                relabel(tx, message.conversation_id, parent_conversation)?;
                message.conversation_id = parent_conversation;
            }
        }
    }

    // Adopt children that declared this message as a parent before it
    // arrived. Their edge rows carry their conversation ids, so one scan
    // finds every waiting thread.
    let waiting = waiting_child_conversations(tx, child_vector.to_hex(), message.conversation_id)?;
    for child_conversation in waiting {
        tracing::debug!(
            from = %child_conversation,
            into = %message.conversation_id,
            "adopting waiting child conversation"
        );
        relabel(tx, child_conversation, message.conversation_id)?;
    }

    Ok(())
}

/// Rewrite the message's parent edges: delete the old set, insert the current
/// parent list with explicit positions for deterministic threaded display.
pub(crate) fn write_edges(tx: &Transaction<'_>, message: &Message) -> Result<()> {
    let Some(child_vector) = message.inventory_vector else {
        return Ok(());
    };

    tx.execute(
        "DELETE FROM message_parents WHERE child_vector = ?1",
        params![child_vector.to_hex()],
    )?;

    for (position, parent) in message.parents.iter().enumerate() {
        tx.execute(
            "INSERT INTO message_parents (parent_vector, child_vector, position, conversation_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                parent.to_hex(),
                child_vector.to_hex(),
                position as i64,
                message.conversation_id.to_string(),
            ],
        )?;
    }

    Ok(())
}

/// Conversation id of the stored message with this inventory vector, if any.
fn conversation_of(tx: &Transaction<'_>, vector_hex: String) -> Result<Option<Uuid>> {
    let result = tx.query_row(
        "SELECT conversation_id FROM messages WHERE inventory_vector = ?1",
        params![vector_hex],
        |row| {
            let raw: String = row.get(0)?;
            parse_uuid(&raw, 0)
        },
    );

    match result {
        Ok(id) => Ok(Some(id)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(other) => Err(other.into()),
    }
}

/// Conversation ids of children whose edges point at this vector, excluding
/// the conversation we already belong to.
fn waiting_child_conversations(
    tx: &Transaction<'_>,
    parent_vector_hex: String,
    own_conversation: Uuid,
) -> Result<Vec<Uuid>> {
    let mut stmt = tx.prepare(
        "SELECT DISTINCT conversation_id FROM message_parents
         WHERE parent_vector = ?1 AND conversation_id != ?2",
    )?;

    let rows = stmt.query_map(
        params![parent_vector_hex, own_conversation.to_string()],
        |row| {
            let raw: String = row.get(0)?;
            parse_uuid(&raw, 0)
        },
    )?;

    let mut conversations = Vec::new();
    for row in rows {
        conversations.push(row?);
    }
    Ok(conversations)
}

/// Move every message row and edge row from one conversation to another.
fn relabel(tx: &Transaction<'_>, from: Uuid, into: Uuid) -> Result<()> {
    tx.execute(
        "UPDATE messages SET conversation_id = ?1 WHERE conversation_id = ?2",
        params![into.to_string(), from.to_string()],
    )?;
    tx.execute(
        "UPDATE message_parents SET conversation_id = ?1 WHERE conversation_id = ?2",
        params![into.to_string(), from.to_string()],
    )?;
    Ok(())
}

/// Parse a UUID column value, reporting the column index on failure.
pub(crate) fn parse_uuid(value: &str, column: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}
