//! Cluster hash-slot table and key naming.
//!
//! Generated key names embed a hash tag (`zbench:{<tag>}:<pos>`) so that, in
//! cluster mode, the slot a key routes to is a pure function of its keyspace
//! position. The table maps every slot to a fixed-width tag whose CRC16 lands
//! on that slot, which keeps repeated lookups for the same position on the
//! same node.

use std::sync::Arc;

/// Number of cluster hash slots (2^14, the standard cluster constant).
pub const NUM_SLOTS: u64 = 16384;

/// Prefix for every generated key name.
pub const KEY_PREFIX: &str = "zbench";

/// CRC16 (XMODEM variant) as used for cluster slot hashing.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Slot for a key name, honoring `{...}` hash tags.
pub fn slot_for_key(key: &[u8]) -> u16 {
    let hashed = match key.iter().position(|b| *b == b'{') {
        Some(open) => {
            let rest = &key[open + 1..];
            match rest.iter().position(|b| *b == b'}') {
                // An empty tag (`{}`) hashes the whole key, like the server does.
                Some(0) | None => key,
                Some(close) => &rest[..close],
            }
        }
        None => key,
    };
    crc16(hashed) % NUM_SLOTS as u16
}

/// Immutable table of one hash tag per slot, built once at startup.
#[derive(Debug)]
pub struct SlotTable {
    tags: Vec<String>,
}

impl SlotTable {
    /// Build the table by searching fixed-width decimal tags until every slot
    /// has one. Deterministic: the lowest qualifying tag wins each slot.
    pub fn build() -> Arc<Self> {
        let mut tags: Vec<Option<String>> = vec![None; NUM_SLOTS as usize];
        let mut filled = 0usize;
        let mut candidate = 0u64;
        while filled < NUM_SLOTS as usize {
            let tag = format!("{candidate:06}");
            let slot = crc16(tag.as_bytes()) as usize % NUM_SLOTS as usize;
            if tags[slot].is_none() {
                tags[slot] = Some(tag);
                filled += 1;
            }
            candidate += 1;
        }
        let tags = tags.into_iter().map(|t| t.unwrap_or_default()).collect();
        Arc::new(Self { tags })
    }

    /// Tag assigned to a slot.
    pub fn tag(&self, slot: u64) -> &str {
        &self.tags[(slot % NUM_SLOTS) as usize]
    }

    /// Wire key name for a keyspace position. Pure: two calls with the same
    /// position always produce identical output.
    pub fn key_name(&self, pos: u64) -> String {
        format!("{KEY_PREFIX}:{{{}}}:{pos}", self.tag(pos % NUM_SLOTS))
    }
}
