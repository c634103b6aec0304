//! Keyspace partitioning across workers.

/// Half-open keyspace range `[start, end)` owned by exactly one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub start: u64,
    pub end: u64,
}

impl Partition {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split `[start, start + len)` into `clients` contiguous partitions.
///
/// Partitions are pairwise disjoint and their union is exactly the input
/// range; the last partition absorbs the remainder of the integer division.
pub fn partitions(start: u64, len: u64, clients: u64) -> Vec<Partition> {
    let clients = clients.max(1);
    let per_client = len / clients;
    let end = start + len;
    (0..clients)
        .map(|idx| {
            let p_start = start + idx * per_client;
            let p_end = if idx + 1 == clients {
                end
            } else {
                start + (idx + 1) * per_client
            };
            Partition {
                start: p_start,
                end: p_end,
            }
        })
        .collect()
}
