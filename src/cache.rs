//! Executable-method cache.
//!
//! Keyed by function entry address, LRU-evicted at a capacity of roughly
//! 2000 entries, with a page-indexed reverse lookup (`page = addr >> 8`) so
//! a single bus write can cheaply find every cached function that owns the
//! written byte. Writes are recorded into a pending set rather than acted
//! on immediately; `get` drains it before returning, so invalidation never
//! races a lookup that's already in flight.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::bus::WriteObserver;
use crate::codegen::CompiledMethod;

pub const DEFAULT_CAPACITY: usize = 2000;

struct Entry {
    method: Rc<CompiledMethod>,
    /// Monotonically increasing; the lowest tick among cached entries is
    /// evicted first.
    last_used: u64,
}

pub struct MethodCache {
    capacity: usize,
    entries: HashMap<u16, Entry>,
    /// `page -> addresses of cached functions whose instruction bytes fall
    /// on that page`.
    by_page: HashMap<u16, HashSet<u16>>,
    pending_invalidation: HashSet<u16>,
    clock: u64,
}

impl MethodCache {
    pub fn new(capacity: usize) -> Self {
        MethodCache {
            capacity,
            entries: HashMap::new(),
            by_page: HashMap::new(),
            pending_invalidation: HashSet::new(),
            clock: 0,
        }
    }

    /// Returns the cached method for `entry`, draining any pending
    /// invalidations first so a just-modified function is never handed
    /// back stale.
    pub fn get(&mut self, entry: u16) -> Option<Rc<CompiledMethod>> {
        self.drain_pending();
        self.clock += 1;
        let clock = self.clock;
        if let Some(e) = self.entries.get_mut(&entry) {
            e.last_used = clock;
            Some(e.method.clone())
        } else {
            None
        }
    }

    pub fn add(&mut self, method: Rc<CompiledMethod>) {
        self.drain_pending();
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&method.entry_address) {
            self.evict_lru();
        }
        self.clock += 1;
        let pages = pages_of(&method.instruction_addrs);
        for page in &pages {
            self.by_page.entry(*page).or_default().insert(method.entry_address);
        }
        self.entries.insert(
            method.entry_address,
            Entry {
                method,
                last_used: self.clock,
            },
        );
    }

    fn evict_lru(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(addr, _)| *addr);
        if let Some(addr) = victim {
            self.remove(addr);
        }
    }

    fn remove(&mut self, entry: u16) {
        if let Some(e) = self.entries.remove(&entry) {
            for page in pages_of(&e.method.instruction_addrs) {
                if let Some(set) = self.by_page.get_mut(&page) {
                    set.remove(&entry);
                    if set.is_empty() {
                        self.by_page.remove(&page);
                    }
                }
            }
        }
    }

    /// Records a single-address write for later invalidation.
    pub fn memory_changed(&mut self, addr: u16) {
        self.pending_invalidation.insert(addr);
    }

    /// Records a contiguous range of writes (e.g. a DMA transfer or ROM
    /// bank switch) for later invalidation.
    pub fn bulk_memory_changed(&mut self, start: u16, len: u16) {
        for i in 0..len {
            self.pending_invalidation.insert(start.wrapping_add(i));
        }
    }

    fn drain_pending(&mut self) {
        if self.pending_invalidation.is_empty() {
            return;
        }
        let pages: HashSet<u16> = self.pending_invalidation.drain().map(|a| a >> 8).collect();
        let mut victims = HashSet::new();
        for page in pages {
            if let Some(addrs) = self.by_page.get(&page) {
                victims.extend(addrs.iter().copied());
            }
        }
        for addr in victims {
            self.remove(addr);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn pages_of(addrs: &HashSet<u16>) -> HashSet<u16> {
    addrs.iter().map(|a| a >> 8).collect()
}

/// Lets the cache sit on the bus's observer list directly; interior
/// mutability (`RefCell`) is required at the call site since `WriteObserver`
/// takes `&self`.
impl WriteObserver for std::cell::RefCell<MethodCache> {
    fn on_write(&self, addr: u16) {
        self.borrow_mut().memory_changed(addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::CompiledMethod;
    use crate::ir::Program;
    use std::collections::HashSet;

    fn method(entry: u16, bytes: &[u16]) -> Rc<CompiledMethod> {
        let set: HashSet<u16> = bytes.iter().copied().collect();
        Rc::new(CompiledMethod::new(entry, Rc::new(set), Program::new(), 0))
    }

    #[test]
    fn add_then_get_round_trips() {
        let mut cache = MethodCache::new(DEFAULT_CAPACITY);
        cache.add(method(0x8000, &[0x8000, 0x8001]));
        assert!(cache.get(0x8000).is_some());
    }

    #[test]
    fn write_to_owned_page_evicts() {
        let mut cache = MethodCache::new(DEFAULT_CAPACITY);
        cache.add(method(0x8000, &[0x8000, 0x8001]));
        cache.memory_changed(0x8001);
        assert!(cache.get(0x8000).is_none());
    }

    #[test]
    fn lru_eviction_respects_capacity() {
        let mut cache = MethodCache::new(1);
        cache.add(method(0x8000, &[0x8000]));
        cache.add(method(0x9000, &[0x9000]));
        assert!(cache.get(0x8000).is_none());
        assert!(cache.get(0x9000).is_some());
    }
}
