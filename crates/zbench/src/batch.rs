//! Pipelined command-batch construction.
//!
//! Batches are built fresh every worker iteration and discarded after
//! dispatch. Ingest batches walk the worker's partition cursor; query batches
//! sample the full keyspace and stride by the slot count so every key in one
//! batch shares a hash slot.

use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::Rng;
use redis_protocol::resp2::types::BytesFrame;

use crate::config::QueryKind;
use crate::slots::{SlotTable, NUM_SLOTS};

/// Alphabet for element payloads and lexical range starts.
pub const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Random lowercase string of the given length.
pub fn random_payload(rng: &mut SmallRng, len: usize) -> String {
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

fn bulk(arg: impl Into<Bytes>) -> BytesFrame {
    BytesFrame::BulkString(arg.into())
}

fn command(args: Vec<BytesFrame>) -> BytesFrame {
    BytesFrame::Array(args)
}

/// Ingest batch plus the element count it will add.
pub struct IngestBatch {
    pub frames: Vec<BytesFrame>,
    pub elements: u64,
    pub next_cursor: u64,
}

/// Build `pipeline` ZADD commands for sequential positions starting at
/// `cursor`. Each key receives between `min_elements` (inclusive) and
/// `max_elements` (exclusive) random (score, payload) pairs.
pub fn ingest_batch(
    rng: &mut SmallRng,
    table: &SlotTable,
    cursor: u64,
    pipeline: u64,
    min_elements: u64,
    max_elements: u64,
    data_size: usize,
) -> IngestBatch {
    let mut frames = Vec::with_capacity(pipeline as usize);
    let mut elements = 0u64;
    let mut pos = cursor;
    for _ in 0..pipeline {
        let n = rng.gen_range(min_elements..max_elements);
        let mut args = Vec::with_capacity(2 + 2 * n as usize);
        args.push(bulk(Bytes::from_static(b"ZADD")));
        args.push(bulk(table.key_name(pos)));
        for _ in 0..n {
            args.push(bulk(format!("{:.6}", rng.gen::<f32>())));
            args.push(bulk(random_payload(rng, data_size)));
        }
        frames.push(command(args));
        elements += n;
        pos += 1;
    }
    IngestBatch {
        frames,
        elements,
        next_cursor: pos,
    }
}

/// Build `pipeline` range-query commands, optionally wrapped in MULTI/EXEC.
///
/// The start position is drawn uniformly from the whole keyspace; each
/// subsequent command advances the position by the slot count, wrapping
/// modulo the keyspace length. Because the stride equals the slot count, the
/// slot tag is identical across the batch whenever the keyspace length is a
/// multiple of the slot count.
pub fn query_batch(
    rng: &mut SmallRng,
    table: &SlotTable,
    keyspace_start: u64,
    keyspace_len: u64,
    pipeline: u64,
    kind: QueryKind,
    multi: bool,
) -> Vec<BytesFrame> {
    let extra = if multi { 2 } else { 0 };
    let mut frames = Vec::with_capacity(pipeline as usize + extra);
    if multi {
        frames.push(command(vec![bulk(Bytes::from_static(b"MULTI"))]));
    }
    let mut pos = rng.gen_range(0..keyspace_len);
    for _ in 0..pipeline {
        let key = bulk(table.key_name(keyspace_start + pos));
        let frame = match kind {
            QueryKind::ZrangeByscore => command(vec![
                bulk(Bytes::from_static(b"ZRANGE")),
                key,
                bulk(Bytes::from_static(b"0")),
                bulk(Bytes::from_static(b"1")),
                bulk(Bytes::from_static(b"BYSCORE")),
            ]),
            QueryKind::ZrangeByscoreRev => command(vec![
                bulk(Bytes::from_static(b"ZREVRANGEBYSCORE")),
                key,
                bulk(Bytes::from_static(b"1")),
                bulk(Bytes::from_static(b"0")),
            ]),
            QueryKind::Zrevrangebylex => {
                let letter = CHARSET[rng.gen_range(0..CHARSET.len())] as char;
                command(vec![
                    bulk(Bytes::from_static(b"ZREVRANGEBYLEX")),
                    key,
                    bulk(format!("[{letter}")),
                    bulk(Bytes::from_static(b"-")),
                ])
            }
        };
        frames.push(frame);
        pos = (pos + NUM_SLOTS) % keyspace_len;
    }
    if multi {
        frames.push(command(vec![bulk(Bytes::from_static(b"EXEC"))]));
    }
    frames
}
