use std::collections::HashMap;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;

/// A single mutation against the ordered-list store. Batches of ops passed
/// to [`QueueStore::apply`] execute atomically: either all take effect or
/// none do.
#[derive(Clone, Debug)]
pub enum ListOp {
    /// Push an item onto the head of a list
    PushFront { list: String, item: String },
    /// Remove every occurrence of an exact serialized item from a list
    Remove { list: String, item: String },
    /// Retain only the elements between `start` and `stop` inclusive,
    /// with negative indices counting from the tail
    Trim { list: String, start: i64, stop: i64 },
}

/// Contract of the cache/queue store: ordered lists with atomic multi-op
/// application, an approximate-membership filter, and a small string k/v.
///
/// List indexing follows the ordered-list store convention: index 0 is the
/// head (most recent push), -1 is the tail (oldest item).
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Push an item onto the head of a list
    async fn push_front(&self, list: &str, item: &str) -> Result<()>;

    /// Read the elements between `start` and `stop` inclusive, in list
    /// order (head to tail). Negative indices count from the tail.
    async fn range(&self, list: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// Length of a list
    async fn len(&self, list: &str) -> Result<i64>;

    /// Apply a batch of list mutations atomically
    async fn apply(&self, ops: Vec<ListOp>) -> Result<()>;

    /// Whether the approximate-membership filter may contain `member`.
    /// One-sided error: `false` is definite, `true` may be a false positive.
    async fn filter_contains(&self, filter: &str, member: &str) -> Result<bool>;

    /// Insert a member into the approximate-membership filter (idempotent)
    async fn filter_insert(&self, filter: &str, member: &str) -> Result<()>;

    /// Read a string key
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a string key
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Classic Bloom filter sized from a target capacity and error rate.
/// Uses double hashing over two independent seeds.
#[derive(Debug)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    pub fn new(capacity: usize, error_rate: f64) -> Self {
        let n = capacity.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let num_bits = ((-n * error_rate.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as u32;
        Self {
            bits: vec![0u64; ((num_bits + 63) / 64) as usize],
            num_bits,
            num_hashes,
        }
    }

    fn hash_pair(member: &str) -> (u64, u64) {
        let mut h1 = std::collections::hash_map::DefaultHasher::new();
        member.hash(&mut h1);
        let mut h2 = std::collections::hash_map::DefaultHasher::new();
        0xb10_0fu64.hash(&mut h2);
        member.hash(&mut h2);
        (h1.finish(), h2.finish())
    }

    pub fn insert(&mut self, member: &str) {
        let (h1, h2) = Self::hash_pair(member);
        for i in 0..self.num_hashes {
            let bit = h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits;
            self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        }
    }

    pub fn contains(&self, member: &str) -> bool {
        let (h1, h2) = Self::hash_pair(member);
        (0..self.num_hashes).all(|i| {
            let bit = h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits;
            self.bits[(bit / 64) as usize] & (1 << (bit % 64)) != 0
        })
    }
}

#[derive(Default)]
struct QueueState {
    lists: HashMap<String, VecDeque<String>>,
    filters: HashMap<String, BloomFilter>,
    kv: HashMap<String, String>,
}

/// In-memory queue store. A single mutex over the whole state makes
/// [`QueueStore::apply`] trivially atomic.
pub struct MemoryQueueStore {
    state: Mutex<QueueState>,
    filter_capacity: usize,
    filter_error_rate: f64,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::with_filter_params(1_000_000, 0.1)
    }

    pub fn with_filter_params(capacity: usize, error_rate: f64) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            filter_capacity: capacity,
            filter_error_rate: error_rate,
        }
    }

    fn resolve_index(len: usize, idx: i64) -> i64 {
        if idx < 0 {
            len as i64 + idx
        } else {
            idx
        }
    }

    fn apply_op(state: &mut QueueState, op: &ListOp) {
        match op {
            ListOp::PushFront { list, item } => {
                state
                    .lists
                    .entry(list.clone())
                    .or_default()
                    .push_front(item.clone());
            }
            ListOp::Remove { list, item } => {
                if let Some(entries) = state.lists.get_mut(list) {
                    entries.retain(|e| e != item);
                }
            }
            ListOp::Trim { list, start, stop } => {
                if let Some(entries) = state.lists.get_mut(list) {
                    let len = entries.len();
                    let start = Self::resolve_index(len, *start).max(0) as usize;
                    let stop = Self::resolve_index(len, *stop);
                    if stop < start as i64 {
                        entries.clear();
                    } else {
                        let stop = (stop as usize).min(len.saturating_sub(1));
                        let kept: VecDeque<String> =
                            entries.iter().skip(start).take(stop - start + 1).cloned().collect();
                        *entries = kept;
                    }
                }
            }
        }
    }
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn push_front(&self, list: &str, item: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::apply_op(
            &mut state,
            &ListOp::PushFront {
                list: list.to_string(),
                item: item.to_string(),
            },
        );
        Ok(())
    }

    async fn range(&self, list: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let state = self.state.lock();
        let Some(entries) = state.lists.get(list) else {
            return Ok(Vec::new());
        };
        let len = entries.len();
        let start = Self::resolve_index(len, start).max(0) as usize;
        let stop = Self::resolve_index(len, stop);
        if stop < 0 || start >= len || stop < start as i64 {
            return Ok(Vec::new());
        }
        let stop = (stop as usize).min(len - 1);
        Ok(entries.iter().skip(start).take(stop - start + 1).cloned().collect())
    }

    async fn len(&self, list: &str) -> Result<i64> {
        let state = self.state.lock();
        Ok(state.lists.get(list).map_or(0, |l| l.len() as i64))
    }

    async fn apply(&self, ops: Vec<ListOp>) -> Result<()> {
        let mut state = self.state.lock();
        for op in &ops {
            Self::apply_op(&mut state, op);
        }
        Ok(())
    }

    async fn filter_contains(&self, filter: &str, member: &str) -> Result<bool> {
        let state = self.state.lock();
        Ok(state
            .filters
            .get(filter)
            .map_or(false, |f| f.contains(member)))
    }

    async fn filter_insert(&self, filter: &str, member: &str) -> Result<()> {
        let mut state = self.state.lock();
        let capacity = self.filter_capacity;
        let error_rate = self.filter_error_rate;
        state
            .filters
            .entry(filter.to_string())
            .or_insert_with(|| BloomFilter::new(capacity, error_rate))
            .insert(member);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let state = self.state.lock();
        Ok(state.kv.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.kv.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
