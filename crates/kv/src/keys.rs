//! Physical key layout.
//!
//! Each version of a logical key is stored as two entries:
//!
//! ```text
//! <logical key> 0x00 <discriminator> 0x00 'k'   -> value bytes
//! <logical key> 0x00 <discriminator> 0x00 'm'   -> {"clock": {...}}
//! ```
//!
//! Logical keys never contain `0x00`, so every entry of a key sorts inside
//! `[key 0x00, key 0x01)` and the value entry of a version sorts just before
//! its metadata entry.

use crate::error::KvError;
use vclocked_storage::RangeQuery;

pub const SEPARATOR: u8 = 0x00;
pub const SEPARATOR_END: u8 = 0x01;

/// Which half of a version an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Value,
    Meta,
}

impl EntryKind {
    pub fn tag(self) -> u8 {
        match self {
            Self::Value => b'k',
            Self::Meta => b'm',
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'k' => Some(Self::Value),
            b'm' => Some(Self::Meta),
            _ => None,
        }
    }
}

/// A decoded physical key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalKey {
    pub logical: String,
    pub discriminator: String,
    pub kind: EntryKind,
}

/// Reject keys the layout cannot represent.
pub fn validate_key(key: &str) -> Result<(), KvError> {
    if key.is_empty() {
        return Err(KvError::InvalidArgument("key must not be empty".into()));
    }
    if key.as_bytes().contains(&SEPARATOR) {
        return Err(KvError::InvalidArgument(format!(
            "key {:?} contains the reserved separator byte",
            key
        )));
    }
    Ok(())
}

/// `key ++ SEP ++ discriminator ++ SEP ++ kind`.
pub fn encode(key: &str, discriminator: &str, kind: EntryKind) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + discriminator.len() + 3);
    out.extend_from_slice(key.as_bytes());
    out.push(SEPARATOR);
    out.extend_from_slice(discriminator.as_bytes());
    out.push(SEPARATOR);
    out.push(kind.tag());
    out
}

/// Split a physical key back into its parts. Returns `None` for entries
/// that were not written by this layout.
pub fn decode(physical: &[u8]) -> Option<PhysicalKey> {
    let first = physical.iter().position(|&b| b == SEPARATOR)?;
    let last = physical.iter().rposition(|&b| b == SEPARATOR)?;
    if last <= first || last + 2 != physical.len() {
        return None;
    }
    let kind = EntryKind::from_tag(physical[last + 1])?;
    let logical = std::str::from_utf8(&physical[..first]).ok()?;
    let discriminator = std::str::from_utf8(&physical[first + 1..last]).ok()?;
    Some(PhysicalKey {
        logical: logical.to_string(),
        discriminator: discriminator.to_string(),
        kind,
    })
}

/// The range holding every entry of `key`.
pub fn bracket(key: &str) -> RangeQuery {
    let mut start = key.as_bytes().to_vec();
    start.push(SEPARATOR);
    let mut end = key.as_bytes().to_vec();
    end.push(SEPARATOR_END);
    RangeQuery::all().start(start).end(end)
}

/// A fresh per-write token. Uniqueness is all that matters; collisions are
/// not checked.
pub fn new_discriminator() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
