//! Content-addressed binary packet store.
//!
//! Large binary payloads travel out-of-band from the JSON message stream,
//! addressed by a small integer id. The store deduplicates by exact
//! content: registering the same bytes twice while the first registration
//! is live yields the same id, so identical payloads are transmitted once.
//!
//! # Generations
//!
//! Liveness is generational. Between two [`PacketStore::sweep`] calls,
//! every id that should stay alive must be touched (registration counts as
//! a touch). `sweep()` frees everything untouched. Freed ids are **never
//! reused**, and a freed (or never-allocated) id resolves to an empty
//! payload rather than an error — a remote renderer asking for a packet
//! it learned about two frames ago gets empty bytes, not a fault.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

/// Out-of-band payload address. Small, dense, monotonically allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PacketId(pub u64);

impl PacketId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Content-addressed packet allocator.
#[derive(Default)]
pub struct PacketStore {
    /// Live payloads by content.
    by_content: ahash::AHashMap<Arc<[u8]>, PacketId>,
    /// Live payloads by id.
    live: ahash::AHashMap<PacketId, Arc<[u8]>>,
    /// Ids touched since the last sweep.
    touched: ahash::AHashSet<PacketId>,
    /// Next id to allocate. Never decremented; freed ids never return.
    next: u64,
}

impl std::fmt::Debug for PacketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketStore")
            .field("live", &self.live.len())
            .field("touched", &self.touched.len())
            .field("next", &self.next)
            .finish()
    }
}

impl PacketStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a payload, returning its id.
    ///
    /// Identical live content shares one id. Registration touches the id
    /// for the current generation.
    pub fn register(&mut self, bytes: &[u8]) -> PacketId {
        if let Some(&id) = self.by_content.get(bytes) {
            self.touched.insert(id);
            return id;
        }

        let id = PacketId(self.next);
        self.next += 1;
        let payload: Arc<[u8]> = Arc::from(bytes);
        self.by_content.insert(Arc::clone(&payload), id);
        self.live.insert(id, payload);
        self.touched.insert(id);
        debug!(id = id.raw(), bytes = bytes.len(), "packet registered");
        id
    }

    /// Keep `id` alive through the next sweep.
    pub fn touch(&mut self, id: PacketId) {
        if self.live.contains_key(&id) {
            self.touched.insert(id);
        }
    }

    /// End the generation: free every live id not touched since the last
    /// sweep. Returns the freed ids.
    pub fn sweep(&mut self) -> Vec<PacketId> {
        let mut freed = Vec::new();
        let stale: Vec<PacketId> = self
            .live
            .keys()
            .filter(|id| !self.touched.contains(id))
            .copied()
            .collect();

        for id in stale {
            if let Some(payload) = self.live.remove(&id) {
                self.by_content.remove(&payload);
            }
            freed.push(id);
        }
        self.touched.clear();

        if !freed.is_empty() {
            debug!(count = freed.len(), "packets freed");
        }
        freed
    }

    /// Resolve a payload.
    ///
    /// A freed or never-allocated id yields an empty payload; resolution
    /// never errors.
    #[must_use]
    pub fn payload(&self, id: PacketId) -> Arc<[u8]> {
        self.live
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Arc::from(&[][..]))
    }

    /// Number of live payloads.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}
