//! Decoded audio cache
//!
//! Random mini-batch draws keep revisiting the same files. The cache keeps
//! decoded copies keyed by path and hands out clones so callers can never
//! mutate the canonical buffer.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::debug;

use crate::audio::{read_sound_file, AudioBuffer};
use crate::error::Result;

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<PathBuf, AudioBuffer>,
    /// Least recently used first
    order: VecDeque<PathBuf>,
}

impl CacheState {
    fn touch(&mut self, path: &Path) {
        if let Some(pos) = self.order.iter().position(|p| p == path) {
            if let Some(entry) = self.order.remove(pos) {
                self.order.push_back(entry);
            }
        }
    }
}

/// Thread-safe, LRU-bounded cache of decoded audio files
#[derive(Debug)]
pub struct SampleCache {
    state: Mutex<CacheState>,
    capacity: usize,
}

impl SampleCache {
    /// Create a cache holding at most `capacity` files
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            capacity: capacity.max(1),
        }
    }

    /// Return an independent copy of the decoded file at `path`.
    ///
    /// The lookup-or-populate sequence runs under the lock, so concurrent
    /// callers never decode the same file twice.
    pub fn read_file(&self, path: &Path) -> Result<AudioBuffer> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(buffer) = state.entries.get(path) {
            let copy = buffer.clone();
            state.touch(path);
            return Ok(copy);
        }

        let buffer = read_sound_file(path)?;
        debug!("Cached {}", path.display());

        while state.entries.len() >= self.capacity {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            debug!("Evicting {}", oldest.display());
            state.entries.remove(&oldest);
        }

        state.entries.insert(path.to_path_buf(), buffer.clone());
        state.order.push_back(path.to_path_buf());
        Ok(buffer)
    }

    /// Number of cached files
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check whether a path is currently cached
    pub fn contains(&self, path: &Path) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .contains_key(path)
    }
}
