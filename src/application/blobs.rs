//! Process-wide mapping from short references to payloads.
//!
//! The store is keyed globally across documents. References are random, so a
//! new one is checked against existing keys before it is handed out; payload
//! checksums are indexed so identical bytes always land under one reference.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use tracing::{debug, warn};

use crate::domain::attachments::{Payload, ShortRef};
use crate::domain::error::DomainError;
use crate::util::lock::{read_guard, write_guard};

/// Attempts made to find an unused random reference before giving up.
pub const MAX_ALLOCATION_ATTEMPTS: usize = 32;

const OWNER: &str = "application::blobs::BlobStore";

/// Result of interning a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interned {
    pub reference: ShortRef,
    /// True when the bytes were already present under `reference`.
    pub reused: bool,
}

#[derive(Debug, Default)]
struct BlobState {
    entries: BTreeMap<ShortRef, Payload>,
    by_checksum: HashMap<String, ShortRef>,
    pending: BTreeSet<ShortRef>,
}

impl BlobState {
    fn put(&mut self, reference: ShortRef, payload: Payload) {
        self.by_checksum
            .entry(payload.checksum())
            .or_insert_with(|| reference.clone());
        self.entries.insert(reference, payload);
    }
}

#[derive(Debug, Default)]
pub struct BlobStore {
    state: RwLock<BlobState>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load entries that already exist in durable storage.
    ///
    /// Hydrated entries are not pending; an entry already pending keeps its
    /// in-memory payload.
    pub fn hydrate(&self, entries: impl IntoIterator<Item = (ShortRef, Payload)>) -> usize {
        let mut state = write_guard(&self.state, OWNER, "hydrate");
        let mut loaded = 0;
        for (reference, payload) in entries {
            if state.pending.contains(&reference) {
                continue;
            }
            state.put(reference, payload);
            loaded += 1;
        }
        debug!(
            target = "application::blobs",
            loaded,
            total = state.entries.len(),
            "Hydrated blob store"
        );
        loaded
    }

    /// Insert a payload under an explicit reference.
    ///
    /// Returns `Ok(false)` when identical bytes are already stored there and an
    /// error when the reference holds different bytes.
    pub fn insert(&self, reference: ShortRef, payload: Payload) -> Result<bool, DomainError> {
        let mut state = write_guard(&self.state, OWNER, "insert");
        if let Some(existing) = state.entries.get(&reference) {
            if existing == &payload {
                return Ok(false);
            }
            return Err(DomainError::invariant(format!(
                "reference `{reference}` already holds a different payload"
            )));
        }
        state.pending.insert(reference.clone());
        state.put(reference, payload);
        Ok(true)
    }

    /// Store `payload`, reusing the reference of identical bytes when present.
    ///
    /// Fresh references are random and collision-checked; `None` means every
    /// attempt collided.
    pub fn intern(&self, payload: &Payload, extension: &str) -> Option<Interned> {
        let checksum = payload.checksum();
        let mut state = write_guard(&self.state, OWNER, "intern");

        if let Some(reference) = state.by_checksum.get(&checksum) {
            return Some(Interned {
                reference: reference.clone(),
                reused: true,
            });
        }

        let mut rng = rand::rng();
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let candidate = ShortRef::generate(&mut rng, extension);
            if state.entries.contains_key(&candidate) {
                continue;
            }
            state.pending.insert(candidate.clone());
            state.put(candidate.clone(), payload.clone());
            return Some(Interned {
                reference: candidate,
                reused: false,
            });
        }

        warn!(
            target = "application::blobs",
            attempts = MAX_ALLOCATION_ATTEMPTS,
            entries = state.entries.len(),
            "Could not allocate an unused blob reference"
        );
        None
    }

    pub fn get(&self, reference: &str) -> Option<Payload> {
        read_guard(&self.state, OWNER, "get")
            .entries
            .get(reference)
            .cloned()
    }

    pub fn contains(&self, reference: &str) -> bool {
        read_guard(&self.state, OWNER, "contains")
            .entries
            .contains_key(reference)
    }

    pub fn find_by_checksum(&self, checksum: &str) -> Option<ShortRef> {
        read_guard(&self.state, OWNER, "find_by_checksum")
            .by_checksum
            .get(checksum)
            .cloned()
    }

    pub fn references(&self) -> Vec<ShortRef> {
        read_guard(&self.state, OWNER, "references")
            .entries
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        read_guard(&self.state, OWNER, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries created in memory that have not reached durable storage yet.
    pub fn pending(&self) -> Vec<(ShortRef, Payload)> {
        let state = read_guard(&self.state, OWNER, "pending");
        state
            .pending
            .iter()
            .filter_map(|reference| {
                state
                    .entries
                    .get(reference)
                    .map(|payload| (reference.clone(), payload.clone()))
            })
            .collect()
    }

    pub fn mark_persisted(&self, reference: &ShortRef) {
        write_guard(&self.state, OWNER, "mark_persisted")
            .pending
            .remove(reference);
    }
}
