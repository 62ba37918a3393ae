//! Domain model structs persisted in the local message database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the UI layer over IPC.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default time-to-live for newly composed messages: two days.
pub const DEFAULT_TTL_SECONDS: i64 = 2 * 24 * 60 * 60;

// ---------------------------------------------------------------------------
// Inventory vector
// ---------------------------------------------------------------------------

/// The 32-byte hash under which a network object circulates between peers.
///
/// The vector is a pure function of the object payload, so it doubles as the
/// object's identity. Stored as hex in SQLite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InventoryVector(pub [u8; 32]);

impl InventoryVector {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string back into a vector.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl fmt::Display for InventoryVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// Network object
// ---------------------------------------------------------------------------

/// Kind of a network object, as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    GetPubkey,
    Pubkey,
    Msg,
    Broadcast,
}

impl ObjectKind {
    pub fn as_u32(self) -> u32 {
        match self {
            ObjectKind::GetPubkey => 0,
            ObjectKind::Pubkey => 1,
            ObjectKind::Msg => 2,
            ObjectKind::Broadcast => 3,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ObjectKind::GetPubkey),
            1 => Some(ObjectKind::Pubkey),
            2 => Some(ObjectKind::Msg),
            3 => Some(ObjectKind::Broadcast),
            _ => None,
        }
    }
}

/// An opaque, hash-addressed, expiring blob as exchanged between peers.
///
/// Immutable once stored; duplicate stores of the same vector are idempotent
/// no-ops. The protocol engine hands these in fully formed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkObject {
    /// Hash identity of the object.
    pub vector: InventoryVector,
    /// Stream the object belongs to (>= 1).
    pub stream: u32,
    /// When the object drops out of the network-wide inventory.
    pub expires_at: DateTime<Utc>,
    /// Payload format version.
    pub version: u32,
    /// Object kind.
    pub kind: ObjectKind,
    /// Opaque payload bytes, never parsed at this layer.
    pub payload: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// Well-known label roles the client ships with. A label without a kind is
/// user-defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LabelKind {
    Inbox,
    Drafts,
    Sent,
    Unread,
    Trash,
    Broadcasts,
}

impl LabelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LabelKind::Inbox => "inbox",
            LabelKind::Drafts => "drafts",
            LabelKind::Sent => "sent",
            LabelKind::Unread => "unread",
            LabelKind::Trash => "trash",
            LabelKind::Broadcasts => "broadcasts",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "inbox" => Some(LabelKind::Inbox),
            "drafts" => Some(LabelKind::Drafts),
            "sent" => Some(LabelKind::Sent),
            "unread" => Some(LabelKind::Unread),
            "trash" => Some(LabelKind::Trash),
            "broadcasts" => Some(LabelKind::Broadcasts),
            _ => None,
        }
    }
}

/// A tag attached to messages for filtering (inbox, sent, custom folders...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Label {
    /// Surrogate key, assigned by the store on insert.
    pub id: Option<i64>,
    /// Display name.
    pub name: String,
    /// Well-known role, if any.
    pub kind: Option<LabelKind>,
    /// Display color (ARGB).
    pub color: u32,
    /// Explicit sort key; label listings are ordered by this, not by name.
    pub ord: i64,
}

/// Query mode for message listings.
///
/// Modeled as an explicit three-way enum so "messages with no label at all"
/// and "everything" are distinct modes rather than sentinel label values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelFilter {
    /// Messages linked to the given label id.
    ByLabel(i64),
    /// Messages with no label links at all.
    Unlabeled,
    /// All messages regardless of labels.
    All,
}

// ---------------------------------------------------------------------------
// Addresses
// ---------------------------------------------------------------------------

/// A sender or recipient, optionally enriched with locally known metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Address {
    /// The encoded address string as it appears on the wire.
    pub address: String,
    /// Locally assigned display name, if the address book knows one.
    pub alias: Option<String>,
    /// Whether this address is a chan rather than a person.
    pub chan: bool,
}

impl Address {
    /// An address with no local metadata attached.
    pub fn plain(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            alias: None,
            chan: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Whether a message was addressed to us directly or broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Standard,
    Broadcast,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Standard => "standard",
            MessageKind::Broadcast => "broadcast",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "standard" => Some(MessageKind::Standard),
            "broadcast" => Some(MessageKind::Broadcast),
            _ => None,
        }
    }
}

/// Lifecycle state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Draft,
    Queued,
    DoingProofOfWork,
    Sent,
    Acknowledged,
    Received,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Draft => "draft",
            MessageStatus::Queued => "queued",
            MessageStatus::DoingProofOfWork => "doing_proof_of_work",
            MessageStatus::Sent => "sent",
            MessageStatus::Acknowledged => "acknowledged",
            MessageStatus::Received => "received",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(MessageStatus::Draft),
            "queued" => Some(MessageStatus::Queued),
            "doing_proof_of_work" => Some(MessageStatus::DoingProofOfWork),
            "sent" => Some(MessageStatus::Sent),
            "acknowledged" => Some(MessageStatus::Acknowledged),
            "received" => Some(MessageStatus::Received),
            _ => None,
        }
    }
}

/// A decrypted application message, composed locally or received from the
/// network.
///
/// `id` is absent until the first successful save and never changes after.
/// `conversation_id` starts nil for freshly composed messages; the store
/// assigns one (and may later merge it) during `save_message`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Store-assigned surrogate key.
    pub id: Option<i64>,
    /// Vector of the network object this message arrived as, if it has one.
    pub inventory_vector: Option<InventoryVector>,
    pub kind: MessageKind,
    pub from: Address,
    pub to: Option<Address>,
    /// Decrypted message content, opaque at this layer.
    pub payload: Vec<u8>,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub status: MessageStatus,
    /// Time-to-live in seconds, as requested at send time.
    pub ttl: i64,
    pub retry_count: i64,
    pub next_retry: Option<DateTime<Utc>>,
    /// Hash used to track the proof-of-work computation for this message.
    pub initial_hash: Option<Vec<u8>>,
    /// Conversation this message belongs to. Nil until first save.
    pub conversation_id: Uuid,
    /// Labels currently attached, re-associated in full on every save.
    pub labels: Vec<Label>,
    /// Vectors of the messages this one replies to, in declaration order.
    pub parents: Vec<InventoryVector>,
}

impl Message {
    /// A new draft with sensible defaults; everything else is set by the
    /// caller before saving.
    pub fn new(kind: MessageKind, from: Address, payload: Vec<u8>) -> Self {
        Self {
            id: None,
            inventory_vector: None,
            kind,
            from,
            to: None,
            payload,
            sent_at: None,
            received_at: None,
            status: MessageStatus::Draft,
            ttl: DEFAULT_TTL_SECONDS,
            retry_count: 0,
            next_retry: None,
            initial_hash: None,
            conversation_id: Uuid::nil(),
            labels: Vec::new(),
            parents: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inventory_vector_hex_round_trip() {
        let iv = InventoryVector::new([0x5Au8; 32]);
        let hex = iv.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(InventoryVector::from_hex(&hex).unwrap(), iv);
    }

    #[test]
    fn inventory_vector_rejects_short_hex() {
        assert!(InventoryVector::from_hex("abcd").is_err());
    }

    #[test]
    fn object_kind_wire_codes() {
        for kind in [
            ObjectKind::GetPubkey,
            ObjectKind::Pubkey,
            ObjectKind::Msg,
            ObjectKind::Broadcast,
        ] {
            assert_eq!(ObjectKind::from_u32(kind.as_u32()), Some(kind));
        }
        assert_eq!(ObjectKind::from_u32(9), None);
    }

    #[test]
    fn new_message_has_no_identity_yet() {
        let msg = Message::new(MessageKind::Standard, Address::plain("BM-test"), vec![1]);
        assert!(msg.id.is_none());
        assert!(msg.conversation_id.is_nil());
    }
}
