use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::warn;

/// 有界的读透缓存:逐条 TTL,读时淘汰过期项,写满时淘汰最旧项。
pub struct TtlCache<V> {
    ttl: Duration,
    capacity: usize,
    entries: HashMap<String, (Instant, V)>,
    order: VecDeque<String>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&mut self, key: &str) -> Option<V> {
        match self.entries.get(key) {
            Some((inserted_at, value)) if inserted_at.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&mut self, key: String, value: V) {
        if self.capacity == 0 {
            return;
        }
        if !self.entries.contains_key(&key) {
            // The order queue may hold keys already expired out of the map;
            // popping those does not shrink the map, so keep popping.
            while self.entries.len() >= self.capacity {
                let Some(oldest) = self.order.pop_front() else { break };
                if self.entries.remove(&oldest).is_some() {
                    warn!(key = %oldest, "cache over capacity, evicting oldest entry");
                }
            }
            self.order.push_back(key.clone());
        }
        self.entries.insert(key, (Instant::now(), value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
