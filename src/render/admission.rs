// audiofeed-core - Audiobook chapter rendering for podcast feeds
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Admission control for in-flight renders
//!
//! A key is admitted at most once at a time. `try_acquire` hands out an
//! `AdmissionGuard` that releases the key when dropped, so every exit path
//! (success, error, panic unwinding) releases it.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

/// Set of keys currently being rendered
#[derive(Debug)]
pub struct AdmissionControl<K: Eq + Hash + Clone> {
    active: Arc<Mutex<HashSet<K>>>,
}

impl<K: Eq + Hash + Clone> Clone for AdmissionControl<K> {
    fn clone(&self) -> Self {
        Self {
            active: Arc::clone(&self.active),
        }
    }
}

impl<K: Eq + Hash + Clone> Default for AdmissionControl<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> AdmissionControl<K> {
    pub fn new() -> Self {
        Self {
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Admit `key` unless it is already in flight
    pub fn try_acquire(&self, key: K) -> Option<AdmissionGuard<K>> {
        if self.lock().insert(key.clone()) {
            Some(AdmissionGuard {
                active: Arc::clone(&self.active),
                key,
            })
        } else {
            None
        }
    }

    pub fn is_active(&self, key: &K) -> bool {
        self.lock().contains(key)
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<K>> {
        // The set stays consistent even if a holder panicked
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases its key on drop
#[derive(Debug)]
pub struct AdmissionGuard<K: Eq + Hash + Clone> {
    active: Arc<Mutex<HashSet<K>>>,
    key: K,
}

impl<K: Eq + Hash + Clone> AdmissionGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash + Clone> Drop for AdmissionGuard<K> {
    fn drop(&mut self) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        active.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_acquire_is_refused() {
        let admission = AdmissionControl::new();
        let guard = admission.try_acquire("book-1/chapters".to_string());
        assert!(guard.is_some());
        assert!(admission.try_acquire("book-1/chapters".to_string()).is_none());
        assert!(admission.try_acquire("book-1/segmented".to_string()).is_some());
    }

    #[test]
    fn test_release_on_drop() {
        let admission = AdmissionControl::new();
        {
            let guard = admission.try_acquire(7u32).unwrap();
            assert_eq!(*guard.key(), 7);
            assert!(admission.is_active(&7));
        }
        assert!(!admission.is_active(&7));
        assert!(admission.try_acquire(7).is_some());
    }

    #[test]
    fn test_release_on_error_path() {
        fn plan(admission: &AdmissionControl<u32>) -> Result<(), String> {
            let _guard = admission.try_acquire(1).ok_or("busy")?;
            Err("planning failed".to_string())
        }

        let admission = AdmissionControl::new();
        assert!(plan(&admission).is_err());
        assert_eq!(admission.active_count(), 0);
    }

    #[test]
    fn test_guard_moves_across_threads() {
        let admission = AdmissionControl::new();
        let guard = admission.try_acquire(3u32).unwrap();
        std::thread::spawn(move || drop(guard)).join().unwrap();
        assert!(!admission.is_active(&3));
    }
}
