//! Dispatch collaborators: connection pools speaking RESP.
//!
//! The workload engine only sees the `Dispatcher` trait: an ordered batch of
//! frames goes out, an ordered sequence of replies (or a failure) comes back.
//! `RespPool` talks to a standalone server; `ClusterRespPool` routes by hash
//! slot using a topology snapshot fetched once at startup. Neither retries:
//! a transport failure surfaces to the caller unchanged.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use redis_protocol::codec::Resp2;
use redis_protocol::resp2::types::BytesFrame;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use crate::slots::slot_for_key;

type Conn = Framed<TcpStream, Resp2>;

/// Ordered pipelined dispatch of wire commands.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Send `batch` as one round trip and return one reply per command, in
    /// order. Any transport or protocol failure is returned as an error.
    async fn dispatch(&self, batch: &[BytesFrame]) -> anyhow::Result<Vec<BytesFrame>>;
}

async fn connect(addr: SocketAddr, password: &str) -> anyhow::Result<Conn> {
    let socket = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connect to {addr}"))?;
    socket.set_nodelay(true).ok();
    let mut conn = Framed::new(socket, Resp2::default());
    if !password.is_empty() {
        let auth = BytesFrame::Array(vec![
            BytesFrame::BulkString(Bytes::from_static(b"AUTH")),
            BytesFrame::BulkString(Bytes::from(password.as_bytes().to_vec())),
        ]);
        conn.send(auth).await.context("send AUTH")?;
        match conn.next().await {
            Some(Ok(BytesFrame::SimpleString(s))) if s.as_ref() == b"OK" => {}
            Some(Ok(BytesFrame::Error(err))) => anyhow::bail!("AUTH rejected: {err}"),
            Some(Ok(other)) => anyhow::bail!("unexpected AUTH reply: {other:?}"),
            Some(Err(err)) => return Err(err).context("read AUTH reply"),
            None => anyhow::bail!("connection closed during AUTH"),
        }
    }
    Ok(conn)
}

/// Write every frame, flush once, then read exactly `expected` replies.
async fn round_trip(
    conn: &mut Conn,
    batch: &[BytesFrame],
    expected: usize,
) -> anyhow::Result<Vec<BytesFrame>> {
    for frame in batch {
        conn.feed(frame.clone()).await.context("write command")?;
    }
    conn.flush().await.context("flush pipeline")?;
    let mut replies = Vec::with_capacity(expected);
    for _ in 0..expected {
        match conn.next().await {
            Some(Ok(frame)) => replies.push(frame),
            Some(Err(err)) => return Err(err).context("read reply"),
            None => anyhow::bail!("connection closed mid-batch"),
        }
    }
    Ok(replies)
}

/// Fixed-size pool of RESP connections to one standalone server.
#[derive(Debug)]
pub struct RespPool {
    conns: Vec<Mutex<Conn>>,
    next: AtomicUsize,
}

impl RespPool {
    /// Open `pool_size` connections up front; AUTH runs on each when a
    /// password is configured.
    pub async fn connect(
        addr: SocketAddr,
        password: &str,
        pool_size: usize,
    ) -> anyhow::Result<Self> {
        let pool_size = pool_size.max(1);
        let mut conns = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            conns.push(Mutex::new(connect(addr, password).await?));
        }
        Ok(Self {
            conns,
            next: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Dispatcher for RespPool {
    async fn dispatch(&self, batch: &[BytesFrame]) -> anyhow::Result<Vec<BytesFrame>> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.conns.len();
        let mut conn = self.conns[idx].lock().await;
        round_trip(&mut conn, batch, batch.len()).await
    }
}

/// Key argument of a command frame, when it has one.
fn frame_key(frame: &BytesFrame) -> Option<&[u8]> {
    let BytesFrame::Array(parts) = frame else {
        return None;
    };
    match parts.get(1) {
        Some(BytesFrame::BulkString(key)) => Some(key.as_ref()),
        _ => None,
    }
}

/// Slot-routing pool for cluster deployments.
///
/// Topology is fetched once from the seed node via `CLUSTER SLOTS`; there is
/// no re-discovery, moved-slot handling, or retry. Commands in a batch are
/// grouped by owning node; batches built with the slot-tag scheme land on one
/// node and keep single-round-trip semantics.
pub struct ClusterRespPool {
    nodes: Vec<RespPool>,
    slot_owner: Vec<usize>,
}

impl ClusterRespPool {
    pub async fn connect(
        seed: SocketAddr,
        password: &str,
        pool_size: usize,
    ) -> anyhow::Result<Self> {
        let mut conn = connect(seed, password).await?;
        let request = BytesFrame::Array(vec![
            BytesFrame::BulkString(Bytes::from_static(b"CLUSTER")),
            BytesFrame::BulkString(Bytes::from_static(b"SLOTS")),
        ]);
        let reply = round_trip(&mut conn, std::slice::from_ref(&request), 1)
            .await
            .context("CLUSTER SLOTS")?
            .remove(0);
        let ranges = parse_cluster_slots(&reply)?;
        anyhow::ensure!(!ranges.is_empty(), "CLUSTER SLOTS returned no ranges");

        let mut addrs: Vec<SocketAddr> = Vec::new();
        let mut slot_owner = vec![usize::MAX; crate::slots::NUM_SLOTS as usize];
        for (start, end, addr) in ranges {
            let node_idx = match addrs.iter().position(|a| *a == addr) {
                Some(idx) => idx,
                None => {
                    addrs.push(addr);
                    addrs.len() - 1
                }
            };
            for slot in start..=end {
                slot_owner[slot as usize] = node_idx;
            }
        }
        anyhow::ensure!(
            slot_owner.iter().all(|owner| *owner != usize::MAX),
            "cluster topology does not cover all hash slots"
        );

        let mut nodes = Vec::with_capacity(addrs.len());
        for addr in addrs {
            nodes.push(RespPool::connect(addr, password, pool_size).await?);
        }
        Ok(Self { nodes, slot_owner })
    }

    fn node_for_key(&self, key: &[u8]) -> usize {
        self.slot_owner[slot_for_key(key) as usize]
    }
}

#[async_trait]
impl Dispatcher for ClusterRespPool {
    async fn dispatch(&self, batch: &[BytesFrame]) -> anyhow::Result<Vec<BytesFrame>> {
        // Keyless frames (MULTI/EXEC markers) pin the whole batch to the node
        // owning its first keyed command, keeping the transaction on one node.
        if batch.iter().any(|f| frame_key(f).is_none()) {
            let key = batch
                .iter()
                .find_map(frame_key)
                .context("batch has no keyed command to route by")?;
            let node = self.node_for_key(key);
            return self.nodes[node].dispatch(batch).await;
        }

        // Group commands by owning node, preserving each command's original
        // batch index so replies reassemble in order.
        let mut groups: Vec<(usize, Vec<usize>)> = Vec::new();
        for (idx, frame) in batch.iter().enumerate() {
            let key = frame_key(frame).context("command frame missing key")?;
            let node = self.node_for_key(key);
            match groups.iter_mut().find(|(n, _)| *n == node) {
                Some((_, indices)) => indices.push(idx),
                None => groups.push((node, vec![idx])),
            }
        }

        if let [(node, _)] = groups.as_slice() {
            return self.nodes[*node].dispatch(batch).await;
        }

        let futures = groups.iter().map(|(node, indices)| {
            let sub: Vec<BytesFrame> = indices.iter().map(|i| batch[*i].clone()).collect();
            async move { self.nodes[*node].dispatch(&sub).await }
        });
        let results = futures_util::future::try_join_all(futures).await?;

        let mut replies: Vec<Option<BytesFrame>> = vec![None; batch.len()];
        for ((_, indices), sub_replies) in groups.iter().zip(results) {
            for (idx, reply) in indices.iter().zip(sub_replies) {
                replies[*idx] = Some(reply);
            }
        }
        replies
            .into_iter()
            .map(|r| r.context("missing reply for batch slot"))
            .collect()
    }
}

/// Parse a `CLUSTER SLOTS` reply into `(start, end, primary_addr)` ranges.
fn parse_cluster_slots(reply: &BytesFrame) -> anyhow::Result<Vec<(u16, u16, SocketAddr)>> {
    let BytesFrame::Array(entries) = reply else {
        anyhow::bail!("unexpected CLUSTER SLOTS reply: {reply:?}");
    };
    let mut ranges = Vec::with_capacity(entries.len());
    for entry in entries {
        let BytesFrame::Array(parts) = entry else {
            anyhow::bail!("malformed slot range entry");
        };
        let (Some(BytesFrame::Integer(start)), Some(BytesFrame::Integer(end))) =
            (parts.first(), parts.get(1))
        else {
            anyhow::bail!("slot range entry missing bounds");
        };
        let Some(BytesFrame::Array(primary)) = parts.get(2) else {
            anyhow::bail!("slot range entry missing primary node");
        };
        let (Some(BytesFrame::BulkString(host)), Some(BytesFrame::Integer(port))) =
            (primary.first(), primary.get(1))
        else {
            anyhow::bail!("primary node entry missing host/port");
        };
        let host = std::str::from_utf8(host).context("primary host is not utf-8")?;
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("invalid primary address {host}:{port}"))?;
        let start = u16::try_from(*start)
            .ok()
            .filter(|s| u64::from(*s) < crate::slots::NUM_SLOTS)
            .with_context(|| format!("slot range start {start} out of range"))?;
        let end = u16::try_from(*end)
            .ok()
            .filter(|e| u64::from(*e) < crate::slots::NUM_SLOTS)
            .with_context(|| format!("slot range end {end} out of range"))?;
        ranges.push((start, end, addr));
    }
    Ok(ranges)
}

/// Build the dispatch collaborator selected by configuration.
pub async fn build_dispatcher(
    addr: SocketAddr,
    password: &str,
    pool_size: usize,
    cluster: bool,
) -> anyhow::Result<Arc<dyn Dispatcher>> {
    if cluster {
        Ok(Arc::new(
            ClusterRespPool::connect(addr, password, pool_size).await?,
        ))
    } else {
        Ok(Arc::new(RespPool::connect(addr, password, pool_size).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cluster_slots_reply() {
        let reply = BytesFrame::Array(vec![
            BytesFrame::Array(vec![
                BytesFrame::Integer(0),
                BytesFrame::Integer(8191),
                BytesFrame::Array(vec![
                    BytesFrame::BulkString(Bytes::from_static(b"127.0.0.1")),
                    BytesFrame::Integer(7000),
                    BytesFrame::BulkString(Bytes::from_static(b"nodeid-a")),
                ]),
            ]),
            BytesFrame::Array(vec![
                BytesFrame::Integer(8192),
                BytesFrame::Integer(16383),
                BytesFrame::Array(vec![
                    BytesFrame::BulkString(Bytes::from_static(b"127.0.0.1")),
                    BytesFrame::Integer(7001),
                    BytesFrame::BulkString(Bytes::from_static(b"nodeid-b")),
                ]),
            ]),
        ]);
        let ranges = parse_cluster_slots(&reply).unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].0, 0);
        assert_eq!(ranges[0].1, 8191);
        assert_eq!(ranges[1].2, "127.0.0.1:7001".parse().unwrap());
    }

    #[test]
    fn rejects_out_of_range_slot_bounds() {
        // 70000 would wrap to 4464 under a plain `as u16` cast and silently
        // remap the wrong slots; 16384 is one past the last valid slot.
        for bad_end in [70000i64, 16384] {
            let reply = BytesFrame::Array(vec![BytesFrame::Array(vec![
                BytesFrame::Integer(0),
                BytesFrame::Integer(bad_end),
                BytesFrame::Array(vec![
                    BytesFrame::BulkString(Bytes::from_static(b"127.0.0.1")),
                    BytesFrame::Integer(7000),
                ]),
            ])]);
            let err = parse_cluster_slots(&reply).expect_err("must reject bad bound");
            assert!(format!("{err:#}").contains("out of range"), "{err:#}");
        }
    }

    #[test]
    fn frame_key_extraction() {
        let zadd = BytesFrame::Array(vec![
            BytesFrame::BulkString(Bytes::from_static(b"ZADD")),
            BytesFrame::BulkString(Bytes::from_static(b"zbench:{000123}:7")),
        ]);
        assert_eq!(frame_key(&zadd), Some(&b"zbench:{000123}:7"[..]));
        let multi = BytesFrame::Array(vec![BytesFrame::BulkString(Bytes::from_static(b"MULTI"))]);
        assert_eq!(frame_key(&multi), None);
    }
}
