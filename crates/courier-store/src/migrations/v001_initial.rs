//! v001 -- Initial schema creation.
//!
//! Creates the five core tables (`objects`, `messages`, `labels`,
//! `message_labels`, `message_parents`) and seeds the well-known labels.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Network objects (the durable inventory)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS objects (
    vector     TEXT PRIMARY KEY NOT NULL,    -- hex-encoded 32-byte hash
    stream     INTEGER NOT NULL,
    expires_at TEXT NOT NULL,                -- ISO-8601 / RFC-3339
    version    INTEGER NOT NULL,
    kind       INTEGER NOT NULL,             -- wire object type 0..3
    payload    BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_objects_stream_expiry
    ON objects(stream, expires_at);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    inventory_vector TEXT UNIQUE,            -- hex-encoded hash, NULL for drafts
    kind             TEXT NOT NULL,          -- standard | broadcast
    sender           TEXT NOT NULL,          -- encoded address string
    recipient        TEXT,                   -- NULL for broadcasts
    payload          BLOB NOT NULL,          -- decrypted content, opaque here
    sent_at          TEXT,
    received_at      TEXT,
    status           TEXT NOT NULL,
    ttl              INTEGER NOT NULL,
    retry_count      INTEGER NOT NULL DEFAULT 0,
    next_retry       TEXT,
    initial_hash     BLOB,                   -- proof-of-work tracking hash
    conversation_id  TEXT NOT NULL           -- UUID v4
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages(conversation_id);

CREATE INDEX IF NOT EXISTS idx_messages_arrival
    ON messages(received_at DESC, sent_at DESC);

-- ----------------------------------------------------------------
-- Labels
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS labels (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    name  TEXT NOT NULL UNIQUE,
    kind  TEXT,                              -- well-known role, NULL = user-defined
    color INTEGER NOT NULL DEFAULT 0,
    ord   INTEGER NOT NULL DEFAULT 0        -- explicit sort key
);

CREATE TABLE IF NOT EXISTS message_labels (
    message_id INTEGER NOT NULL,
    label_id   INTEGER NOT NULL,

    PRIMARY KEY (message_id, label_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
    FOREIGN KEY (label_id)   REFERENCES labels(id)   ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_message_labels_label ON message_labels(label_id);

-- ----------------------------------------------------------------
-- Parent edges (conversation threading)
-- ----------------------------------------------------------------
-- Rows are keyed by vectors, not message ids, so an edge survives even when
-- the parent message itself has not arrived yet. conversation_id is
-- denormalized for fast relabel scans during merges.
CREATE TABLE IF NOT EXISTS message_parents (
    parent_vector   TEXT NOT NULL,           -- hex-encoded hash
    child_vector    TEXT NOT NULL,
    position        INTEGER NOT NULL,        -- index in the child's parent list
    conversation_id TEXT NOT NULL,

    PRIMARY KEY (parent_vector, child_vector)
);

CREATE INDEX IF NOT EXISTS idx_message_parents_child ON message_parents(child_vector);
CREATE INDEX IF NOT EXISTS idx_message_parents_conversation
    ON message_parents(conversation_id);

-- ----------------------------------------------------------------
-- Well-known labels
-- ----------------------------------------------------------------
INSERT OR IGNORE INTO labels (name, kind, color, ord) VALUES
    ('Inbox',      'inbox',      4294901760, 0),
    ('Broadcasts', 'broadcasts', 4289374890, 5),
    ('Drafts',     'drafts',     4294944000, 10),
    ('Sent',       'sent',       4278255360, 20),
    ('Unread',     'unread',     4278190335, 90),
    ('Trash',      'trash',      4286611584, 100);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
