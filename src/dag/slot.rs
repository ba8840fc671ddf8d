use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{DispatchError, Result};

/// Identifies the light cache a slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTag {
    pub algorithm: &'static str,
    pub epoch: u64,
}

#[derive(Debug)]
enum SlotState {
    Invalid,
    Generating(CacheTag),
    Ready { tag: CacheTag, cache: Arc<[u8]> },
}

/// One shared light-cache slot.
///
/// Exactly one caller generates a missing cache while the others for the
/// same slot wait on the condvar. Readers receive an `Arc`, so a cache being
/// replaced for a newer epoch is never freed under a reader.
#[derive(Debug)]
pub struct CacheSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
    regenerations: AtomicU64,
}

impl Default for CacheSlot {
    fn default() -> Self {
        Self {
            state: Mutex::new(SlotState::Invalid),
            ready: Condvar::new(),
            regenerations: AtomicU64::new(0),
        }
    }
}

impl CacheSlot {
    /// Returns the cache for `tag`, running `generate` if the slot holds
    /// anything else. A failed or panicking generation leaves the slot
    /// invalid and wakes the waiters, one of which retries.
    pub fn get_or_generate(
        &self,
        tag: CacheTag,
        generate: impl FnOnce() -> Result<Vec<u8>>,
    ) -> Result<Arc<[u8]>> {
        let mut state = self.lock()?;
        loop {
            match &*state {
                SlotState::Ready { tag: held, cache } if *held == tag => {
                    return Ok(Arc::clone(cache));
                }
                SlotState::Generating(_) => {
                    state = self
                        .ready
                        .wait(state)
                        .map_err(|_| DispatchError::LockPoisoned("light cache slot"))?;
                }
                _ => break,
            }
        }
        *state = SlotState::Generating(tag);
        drop(state);

        let mut guard = GenerationGuard {
            slot: self,
            armed: true,
        };
        debug!(algorithm = tag.algorithm, epoch = tag.epoch, "generating light cache");
        let result = generate();

        let mut state = self.lock()?;
        guard.armed = false;
        let outcome = match result {
            Ok(bytes) => {
                let cache: Arc<[u8]> = bytes.into();
                *state = SlotState::Ready {
                    tag,
                    cache: Arc::clone(&cache),
                };
                self.regenerations.fetch_add(1, Ordering::Relaxed);
                Ok(cache)
            }
            Err(err) => {
                *state = SlotState::Invalid;
                Err(err)
            }
        };
        self.ready.notify_all();
        outcome
    }

    /// Tag of the ready cache, if any.
    pub fn current(&self) -> Option<CacheTag> {
        match &*self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            SlotState::Ready { tag, .. } => Some(*tag),
            _ => None,
        }
    }

    /// Completed generations since the slot was created.
    pub fn regenerations(&self) -> u64 {
        self.regenerations.load(Ordering::Relaxed)
    }

    fn lock(&self) -> Result<MutexGuard<'_, SlotState>> {
        self.state
            .lock()
            .map_err(|_| DispatchError::LockPoisoned("light cache slot"))
    }
}

/// Resets the slot if generation unwinds.
struct GenerationGuard<'a> {
    slot: &'a CacheSlot,
    armed: bool,
}

impl Drop for GenerationGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self
                .slot
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *state = SlotState::Invalid;
            self.slot.ready.notify_all();
        }
    }
}

/// Session-wide counter handing out the high half of DAG search nonces.
#[derive(Debug, Default)]
pub struct NonceAllocator {
    next: Mutex<u32>,
}

impl NonceAllocator {
    pub fn starting_at(start: u32) -> Self {
        Self {
            next: Mutex::new(start),
        }
    }

    /// Returns the current value and advances the counter.
    pub fn next_high(&self) -> Result<u32> {
        let mut next = self
            .next
            .lock()
            .map_err(|_| DispatchError::LockPoisoned("nonce counter"))?;
        let high = *next;
        *next = next.wrapping_add(1);
        Ok(high)
    }
}
