//! CRUD and query operations for [`Message`] records.
//!
//! `save_message` is the write path the sync layer drives: one transaction
//! covering the row itself, the full label re-association, the conversation
//! linking step and the parent-edge rewrite. Everything lands together or
//! not at all.

use std::collections::HashSet;

use rusqlite::{params, Transaction};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::labels::row_to_label;
use crate::models::{
    Address, InventoryVector, LabelFilter, LabelKind, Message, MessageKind, MessageStatus,
};
use crate::objects::parse_timestamp;
use crate::resolver::{resolve_or_plain, AddressResolver};
use crate::threading;

impl Database {
    /// Insert or update a message.
    ///
    /// On first save the message is assigned its permanent id and, if the
    /// caller left it nil, a fresh conversation id. Labels are re-associated
    /// in full, then the threading step runs (parent resolution can change
    /// which conversation id gets written) and the parent edges are
    /// rewritten.
    ///
    /// A uniqueness conflict on insert (the same message arriving twice
    /// through different peers) is logged and swallowed: the sync path must
    /// never crash over data we already have. The caller observes `Ok` but
    /// the message stays without an id.
    pub fn save_message(&mut self, message: &mut Message) -> Result<()> {
        let assigned_fresh_conversation = message.conversation_id.is_nil();
        if assigned_fresh_conversation {
            message.conversation_id = Uuid::new_v4();
        }

        let tx = self.conn_mut().transaction()?;

        match message.id {
            None => match insert_message_row(&tx, message)? {
                Some(id) => message.id = Some(id),
                // Duplicate insert: drop the transaction, persist nothing,
                // and leave the caller's message exactly as it came in.
                None => {
                    if assigned_fresh_conversation {
                        message.conversation_id = Uuid::nil();
                    }
                    return Ok(());
                }
            },
            Some(id) => {
                update_message_row(&tx, message, id)?;
            }
        }

        relink_labels(&tx, message)?;
        threading::link(&tx, message)?;
        threading::write_edges(&tx, message)?;

        tx.commit()?;
        Ok(())
    }

    /// Fetch a single message by id.
    pub fn message(&self, id: i64, resolver: &dyn AddressResolver) -> Result<Message> {
        let result = self.conn().query_row(
            &format!("{MESSAGE_COLUMNS} WHERE id = ?1"),
            params![id],
            row_to_message,
        );

        match result {
            Ok(message) => Ok(self.enrich(message, resolver)?),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::NotFound),
            Err(other) => Err(other.into()),
        }
    }

    /// Probe for the message that arrived as the given network object.
    ///
    /// Returns `Ok(None)` on a miss; probing for parents that have not
    /// arrived yet is a normal part of threading.
    pub fn message_by_inventory_vector(
        &self,
        vector: InventoryVector,
        resolver: &dyn AddressResolver,
    ) -> Result<Option<Message>> {
        let result = self.conn().query_row(
            &format!("{MESSAGE_COLUMNS} WHERE inventory_vector = ?1"),
            params![vector.to_hex()],
            row_to_message,
        );

        match result {
            Ok(message) => Ok(Some(self.enrich(message, resolver)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(other.into()),
        }
    }

    /// List messages under a label filter, newest arrivals first.
    pub fn find_messages(
        &self,
        filter: LabelFilter,
        resolver: &dyn AddressResolver,
    ) -> Result<Vec<Message>> {
        let sql = format!(
            "{MESSAGE_COLUMNS} {} ORDER BY received_at DESC, sent_at DESC",
            filter_clause(filter)
        );
        let mut stmt = self.conn().prepare(&sql)?;

        let mut raw = Vec::new();
        match filter {
            LabelFilter::ByLabel(label_id) => {
                let rows = stmt.query_map(params![label_id], row_to_message)?;
                for row in rows {
                    raw.push(row?);
                }
            }
            LabelFilter::Unlabeled | LabelFilter::All => {
                let rows = stmt.query_map([], row_to_message)?;
                for row in rows {
                    raw.push(row?);
                }
            }
        }

        let mut messages = Vec::with_capacity(raw.len());
        for message in raw {
            messages.push(self.enrich(message, resolver)?);
        }
        Ok(messages)
    }

    /// Distinct conversation ids present under a label filter.
    pub fn find_conversations(&self, filter: LabelFilter) -> Result<HashSet<Uuid>> {
        let sql = format!(
            "SELECT DISTINCT conversation_id FROM messages {}",
            filter_clause(filter)
        );
        let mut stmt = self.conn().prepare(&sql)?;

        let raw: Vec<String> = match filter {
            LabelFilter::ByLabel(label_id) => stmt
                .query_map(params![label_id], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?,
            LabelFilter::Unlabeled | LabelFilter::All => stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?,
        };

        let mut conversations = HashSet::new();
        for value in raw {
            conversations.insert(threading::parse_uuid(&value, 0)?);
        }
        Ok(conversations)
    }

    /// Count messages under a label filter that still carry the well-known
    /// unread label.
    pub fn count_unread(&self, filter: LabelFilter) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM messages {} {} id IN (
                SELECT ml.message_id FROM message_labels ml
                JOIN labels l ON l.id = ml.label_id
                WHERE l.kind = '{}'
            )",
            filter_clause(filter),
            if matches!(filter, LabelFilter::All) { "WHERE" } else { "AND" },
            LabelKind::Unread.as_str(),
        );

        let count = match filter {
            LabelFilter::ByLabel(label_id) => {
                self.conn()
                    .query_row(&sql, params![label_id], |row| row.get(0))?
            }
            LabelFilter::Unlabeled | LabelFilter::All => {
                self.conn().query_row(&sql, [], |row| row.get(0))?
            }
        };
        Ok(count)
    }

    /// Hard-delete a message by id. Label links cascade; the message's own
    /// parent edges are removed, while edges merely pointing at it as a
    /// parent stay (other children still reference that vector).
    pub fn remove_message(&mut self, id: i64) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;

        let vector: Option<String> = match tx.query_row(
            "SELECT inventory_vector FROM messages WHERE id = ?1",
            params![id],
            |row| row.get(0),
        ) {
            Ok(v) => v,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(false),
            Err(other) => return Err(other.into()),
        };

        tx.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        if let Some(vector) = vector {
            tx.execute(
                "DELETE FROM message_parents WHERE child_vector = ?1",
                params![vector],
            )?;
        }

        tx.commit()?;
        Ok(true)
    }

    /// Attach labels and parent edges, and resolve addresses.
    fn enrich(&self, mut message: Message, resolver: &dyn AddressResolver) -> Result<Message> {
        if let Some(id) = message.id {
            message.labels = self.labels_for_message(id)?;
        }
        if let Some(vector) = message.inventory_vector {
            message.parents = self.parents_for_message(vector)?;
        }

        message.from = resolve_or_plain(resolver, &message.from.address);
        message.to = message
            .to
            .map(|to| resolve_or_plain(resolver, &to.address));

        Ok(message)
    }

    fn labels_for_message(&self, message_id: i64) -> Result<Vec<crate::models::Label>> {
        let mut stmt = self.conn().prepare(
            "SELECT l.id, l.name, l.kind, l.color, l.ord
             FROM labels l
             JOIN message_labels ml ON ml.label_id = l.id
             WHERE ml.message_id = ?1
             ORDER BY l.ord ASC",
        )?;

        let rows = stmt.query_map(params![message_id], row_to_label)?;

        let mut labels = Vec::new();
        for row in rows {
            labels.push(row?);
        }
        Ok(labels)
    }

    fn parents_for_message(&self, child: InventoryVector) -> Result<Vec<InventoryVector>> {
        let mut stmt = self.conn().prepare(
            "SELECT parent_vector FROM message_parents
             WHERE child_vector = ?1 ORDER BY position ASC",
        )?;

        let rows = stmt.query_map(params![child.to_hex()], |row| {
            let raw: String = row.get(0)?;
            InventoryVector::from_hex(&raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })?;

        let mut parents = Vec::new();
        for row in rows {
            parents.push(row?);
        }
        Ok(parents)
    }
}

// ---------------------------------------------------------------------------
// Write helpers
// ---------------------------------------------------------------------------

/// Insert the message row. Returns the assigned id, or `None` when the row
/// collided with an already-stored message.
fn insert_message_row(tx: &Transaction<'_>, message: &Message) -> Result<Option<i64>> {
    let result = tx.execute(
        "INSERT INTO messages (inventory_vector, kind, sender, recipient, payload,
                               sent_at, received_at, status, ttl, retry_count,
                               next_retry, initial_hash, conversation_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            message.inventory_vector.map(|v| v.to_hex()),
            message.kind.as_str(),
            message.from.address,
            message.to.as_ref().map(|t| t.address.clone()),
            message.payload,
            message.sent_at.map(|t| t.to_rfc3339()),
            message.received_at.map(|t| t.to_rfc3339()),
            message.status.as_str(),
            message.ttl,
            message.retry_count,
            message.next_retry.map(|t| t.to_rfc3339()),
            message.initial_hash,
            message.conversation_id.to_string(),
        ],
    );

    match result {
        Ok(_) => Ok(Some(tx.last_insert_rowid())),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            tracing::warn!(
                vector = ?message.inventory_vector,
                "duplicate message insert, keeping existing row"
            );
            Ok(None)
        }
        Err(other) => Err(other.into()),
    }
}

fn update_message_row(tx: &Transaction<'_>, message: &Message, id: i64) -> Result<()> {
    tx.execute(
        "UPDATE messages SET inventory_vector = ?1, kind = ?2, sender = ?3,
                             recipient = ?4, payload = ?5, sent_at = ?6,
                             received_at = ?7, status = ?8, ttl = ?9,
                             retry_count = ?10, next_retry = ?11,
                             initial_hash = ?12, conversation_id = ?13
         WHERE id = ?14",
        params![
            message.inventory_vector.map(|v| v.to_hex()),
            message.kind.as_str(),
            message.from.address,
            message.to.as_ref().map(|t| t.address.clone()),
            message.payload,
            message.sent_at.map(|t| t.to_rfc3339()),
            message.received_at.map(|t| t.to_rfc3339()),
            message.status.as_str(),
            message.ttl,
            message.retry_count,
            message.next_retry.map(|t| t.to_rfc3339()),
            message.initial_hash,
            message.conversation_id.to_string(),
            id,
        ],
    )?;
    Ok(())
}

/// Drop and re-insert the message's label links so the stored set always
/// mirrors `message.labels`.
fn relink_labels(tx: &Transaction<'_>, message: &Message) -> Result<()> {
    let Some(message_id) = message.id else {
        return Ok(());
    };

    tx.execute(
        "DELETE FROM message_labels WHERE message_id = ?1",
        params![message_id],
    )?;

    for label in &message.labels {
        let Some(label_id) = label.id else {
            tracing::warn!(name = %label.name, "skipping unsaved label on message");
            continue;
        };
        tx.execute(
            "INSERT INTO message_labels (message_id, label_id) VALUES (?1, ?2)",
            params![message_id, label_id],
        )?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Read helpers
// ---------------------------------------------------------------------------

const MESSAGE_COLUMNS: &str = "SELECT id, inventory_vector, kind, sender, recipient, payload, \
                               sent_at, received_at, status, ttl, retry_count, next_retry, \
                               initial_hash, conversation_id FROM messages";

fn filter_clause(filter: LabelFilter) -> &'static str {
    match filter {
        LabelFilter::ByLabel(_) => {
            "WHERE id IN (SELECT message_id FROM message_labels WHERE label_id = ?1)"
        }
        LabelFilter::Unlabeled => "WHERE id NOT IN (SELECT message_id FROM message_labels)",
        LabelFilter::All => "",
    }
}

/// Map a `rusqlite::Row` to a [`Message`] with bare addresses and without
/// labels or parents; `Database::enrich` fills those in.
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: i64 = row.get(0)?;
    let vector_hex: Option<String> = row.get(1)?;
    let kind_str: String = row.get(2)?;
    let sender: String = row.get(3)?;
    let recipient: Option<String> = row.get(4)?;
    let payload: Vec<u8> = row.get(5)?;
    let sent_str: Option<String> = row.get(6)?;
    let received_str: Option<String> = row.get(7)?;
    let status_str: String = row.get(8)?;
    let ttl: i64 = row.get(9)?;
    let retry_count: i64 = row.get(10)?;
    let next_retry_str: Option<String> = row.get(11)?;
    let initial_hash: Option<Vec<u8>> = row.get(12)?;
    let conversation_str: String = row.get(13)?;

    let inventory_vector = vector_hex
        .as_deref()
        .map(|hex| {
            InventoryVector::from_hex(hex).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    1,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()?;

    let kind = MessageKind::from_str(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown message kind {kind_str}").into(),
        )
    })?;

    let status = MessageStatus::from_str(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Text,
            format!("unknown message status {status_str}").into(),
        )
    })?;

    let sent_at = sent_str.as_deref().map(|s| parse_timestamp(s, 6)).transpose()?;
    let received_at = received_str
        .as_deref()
        .map(|s| parse_timestamp(s, 7))
        .transpose()?;
    let next_retry = next_retry_str
        .as_deref()
        .map(|s| parse_timestamp(s, 11))
        .transpose()?;

    let conversation_id = threading::parse_uuid(&conversation_str, 13)?;

    Ok(Message {
        id: Some(id),
        inventory_vector,
        kind,
        from: Address::plain(sender),
        to: recipient.map(Address::plain),
        payload,
        sent_at,
        received_at,
        status,
        ttl,
        retry_count,
        next_retry,
        initial_hash,
        conversation_id,
        labels: Vec::new(),
        parents: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Label;
    use crate::resolver::PlainResolver;
    use chrono::{Duration, Utc};

    fn received(byte: u8, minutes_ago: i64) -> Message {
        let mut msg = Message::new(MessageKind::Standard, Address::plain("BM-peer"), vec![byte]);
        msg.inventory_vector = Some(InventoryVector::new([byte; 32]));
        msg.status = MessageStatus::Received;
        msg.received_at = Some(Utc::now() - Duration::minutes(minutes_ago));
        msg
    }

    fn label(db: &Database, kind: LabelKind) -> Label {
        db.label_by_kind(kind).unwrap().unwrap()
    }

    #[test]
    fn save_assigns_id_exactly_once() {
        let mut db = Database::open_in_memory().unwrap();

        let mut msg = received(1, 0);
        db.save_message(&mut msg).unwrap();
        let id = msg.id.expect("id assigned on first save");

        msg.status = MessageStatus::Acknowledged;
        db.save_message(&mut msg).unwrap();
        assert_eq!(msg.id, Some(id));

        let loaded = db.message(id, &PlainResolver).unwrap();
        assert_eq!(loaded.status, MessageStatus::Acknowledged);
    }

    #[test]
    fn duplicate_message_insert_is_swallowed() {
        let mut db = Database::open_in_memory().unwrap();

        let mut first = received(1, 0);
        db.save_message(&mut first).unwrap();

        // Same inventory vector, fresh record: the unique index fires.
        let mut dupe = received(1, 0);
        db.save_message(&mut dupe).unwrap();
        assert!(dupe.id.is_none());
        // Nothing was persisted, so nothing on the message may change either.
        assert!(dupe.conversation_id.is_nil());

        assert_eq!(db.find_messages(LabelFilter::All, &PlainResolver).unwrap().len(), 1);
    }

    #[test]
    fn label_round_trip() {
        let mut db = Database::open_in_memory().unwrap();
        let inbox = label(&db, LabelKind::Inbox);
        let unread = label(&db, LabelKind::Unread);

        let mut msg = received(1, 0);
        msg.labels = vec![inbox.clone(), unread.clone()];
        db.save_message(&mut msg).unwrap();

        let by_inbox = db
            .find_messages(LabelFilter::ByLabel(inbox.id.unwrap()), &PlainResolver)
            .unwrap();
        assert_eq!(by_inbox.len(), 1);
        assert_eq!(by_inbox[0].labels.len(), 2);

        // Drop the unread label and re-save; querying by it finds nothing.
        msg.labels = vec![inbox.clone()];
        db.save_message(&mut msg).unwrap();

        let by_unread = db
            .find_messages(LabelFilter::ByLabel(unread.id.unwrap()), &PlainResolver)
            .unwrap();
        assert!(by_unread.is_empty());
    }

    #[test]
    fn unlabeled_and_all_filters() {
        let mut db = Database::open_in_memory().unwrap();
        let inbox = label(&db, LabelKind::Inbox);

        let mut labeled = received(1, 0);
        labeled.labels = vec![inbox];
        db.save_message(&mut labeled).unwrap();

        let mut bare = received(2, 0);
        db.save_message(&mut bare).unwrap();

        let unlabeled = db.find_messages(LabelFilter::Unlabeled, &PlainResolver).unwrap();
        assert_eq!(unlabeled.len(), 1);
        assert_eq!(unlabeled[0].id, bare.id);

        assert_eq!(db.find_messages(LabelFilter::All, &PlainResolver).unwrap().len(), 2);
    }

    #[test]
    fn find_orders_newest_first() {
        let mut db = Database::open_in_memory().unwrap();

        let mut old = received(1, 60);
        db.save_message(&mut old).unwrap();
        let mut fresh = received(2, 1);
        db.save_message(&mut fresh).unwrap();

        let messages = db.find_messages(LabelFilter::All, &PlainResolver).unwrap();
        assert_eq!(messages[0].id, fresh.id);
        assert_eq!(messages[1].id, old.id);
    }

    #[test]
    fn count_unread_tracks_the_unread_label() {
        let mut db = Database::open_in_memory().unwrap();
        let inbox = label(&db, LabelKind::Inbox);
        let unread = label(&db, LabelKind::Unread);

        let mut a = received(1, 0);
        a.labels = vec![inbox.clone(), unread.clone()];
        db.save_message(&mut a).unwrap();

        let mut b = received(2, 0);
        b.labels = vec![inbox.clone()];
        db.save_message(&mut b).unwrap();

        let inbox_id = inbox.id.unwrap();
        assert_eq!(db.count_unread(LabelFilter::ByLabel(inbox_id)).unwrap(), 1);
        assert_eq!(db.count_unread(LabelFilter::All).unwrap(), 1);

        // Mark read.
        a.labels = vec![inbox];
        db.save_message(&mut a).unwrap();
        assert_eq!(db.count_unread(LabelFilter::ByLabel(inbox_id)).unwrap(), 0);
    }

    #[test]
    fn find_conversations_distinct_ids() {
        let mut db = Database::open_in_memory().unwrap();

        let mut root = received(1, 5);
        db.save_message(&mut root).unwrap();
        let mut reply = received(2, 1);
        reply.parents = vec![root.inventory_vector.unwrap()];
        db.save_message(&mut reply).unwrap();
        let mut other = received(3, 0);
        db.save_message(&mut other).unwrap();

        let conversations = db.find_conversations(LabelFilter::All).unwrap();
        assert_eq!(conversations.len(), 2);
        assert!(conversations.contains(&reply.conversation_id));
        assert!(conversations.contains(&other.conversation_id));
    }

    #[test]
    fn remove_message_deletes_row_links_and_own_edges() {
        let mut db = Database::open_in_memory().unwrap();
        let inbox = label(&db, LabelKind::Inbox);

        let mut root = received(1, 5);
        db.save_message(&mut root).unwrap();

        let mut reply = received(2, 0);
        reply.labels = vec![inbox];
        reply.parents = vec![root.inventory_vector.unwrap()];
        db.save_message(&mut reply).unwrap();

        assert!(db.remove_message(reply.id.unwrap()).unwrap());
        assert!(!db.remove_message(reply.id.unwrap()).unwrap());

        assert_eq!(db.find_messages(LabelFilter::All, &PlainResolver).unwrap().len(), 1);
        let edges: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM message_parents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(edges, 0);
    }

    #[test]
    fn addresses_are_enriched_on_read() {
        struct Book;
        impl AddressResolver for Book {
            fn resolve(&self, address: &str) -> Option<Address> {
                (address == "BM-peer").then(|| Address {
                    address: address.to_string(),
                    alias: Some("Peer".to_string()),
                    chan: false,
                })
            }
        }

        let mut db = Database::open_in_memory().unwrap();
        let mut msg = received(1, 0);
        db.save_message(&mut msg).unwrap();

        let loaded = db.message(msg.id.unwrap(), &Book).unwrap();
        assert_eq!(loaded.from.alias.as_deref(), Some("Peer"));
    }

    #[test]
    fn fresh_draft_gets_a_conversation_on_save() {
        let mut db = Database::open_in_memory().unwrap();

        let mut draft = Message::new(MessageKind::Standard, Address::plain("BM-me"), vec![]);
        assert!(draft.conversation_id.is_nil());
        db.save_message(&mut draft).unwrap();
        assert!(!draft.conversation_id.is_nil());
    }
}
