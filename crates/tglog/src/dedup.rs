// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collapses repeated messages into one entry per flush.
//!
//! Each distinct message keeps the location where it was first observed.
//! Entries are drained in first-seen order so the rendered payload reads
//! chronologically, even though lookups go through a hash map.

use hashbrown::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::debounce::{FlushSource, Trigger};

/// Distinct messages kept per flush before new ones are counted and dropped.
pub const DEFAULT_MAX_ENTRIES: usize = 512;

#[derive(Debug)]
struct Entry {
    seq: u64,
    location: String,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_seq: u64,
    dropped: usize,
    armed: bool,
}

pub struct DedupStore {
    inner: Mutex<Inner>,
    trigger: Trigger,
    max_entries: usize,
}

impl DedupStore {
    #[must_use]
    pub fn new(trigger: Trigger) -> Self {
        Self::with_max_entries(trigger, DEFAULT_MAX_ENTRIES)
    }

    #[must_use]
    pub fn with_max_entries(trigger: Trigger, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            trigger,
            max_entries,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `location` under `message` unless the message is already pending.
    /// Returns whether a new entry was created.
    pub fn record(&self, message: impl Into<String>, location: impl Into<String>) -> bool {
        let message = message.into();
        let (inserted, armed) = {
            let mut inner = self.lock();
            let inserted = if inner.entries.contains_key(&message) {
                false
            } else if inner.entries.len() >= self.max_entries {
                inner.dropped += 1;
                false
            } else {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.entries.insert(
                    message,
                    Entry {
                        seq,
                        location: location.into(),
                    },
                );
                true
            };
            // A dropped message still deserves a flush announcing the drop.
            let armed = !std::mem::replace(&mut inner.armed, true);
            (inserted, armed)
        };
        if armed {
            self.trigger.fire();
        }
        inserted
    }

    /// Takes every pending `(message, location)` pair in first-seen order.
    pub fn drain_all(&self) -> Vec<(String, String)> {
        self.take().0
    }

    fn take(&self) -> (Vec<(String, String)>, usize) {
        let (entries, dropped) = {
            let mut inner = self.lock();
            inner.armed = false;
            inner.next_seq = 0;
            (
                std::mem::take(&mut inner.entries),
                std::mem::take(&mut inner.dropped),
            )
        };
        let mut entries: Vec<_> = entries.into_iter().collect();
        entries.sort_unstable_by_key(|(_, entry)| entry.seq);
        let pairs = entries
            .into_iter()
            .map(|(message, entry)| (message, entry.location))
            .collect();
        (pairs, dropped)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FlushSource for DedupStore {
    fn drain(&self) -> Option<String> {
        let (pairs, dropped) = self.take();
        if pairs.is_empty() && dropped == 0 {
            return None;
        }
        let mut body = String::new();
        for (message, location) in pairs {
            body.push_str(&location);
            body.push_str(" # ");
            body.push_str(message.trim_end());
            body.push('\n');
        }
        if dropped > 0 {
            body.push_str(&format!("... {dropped} more distinct messages dropped\n"));
        }
        Some(body)
    }
}
