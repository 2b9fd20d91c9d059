// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared text buffer collecting log fragments from concurrent writers.
//!
//! The buffer, the last-seen unit marker and the dispatcher's armed flag all
//! live behind one mutex, so a drain observes a consistent snapshot and a
//! record's provenance header can never be separated from its body.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::debounce::{FlushSource, Trigger};

#[derive(Debug, Default)]
struct Inner {
    buf: Vec<u8>,
    last_unit: String,
    armed: bool,
}

impl Inner {
    /// Marks the buffer as pending. Returns true only on the idle to pending edge.
    fn arm(&mut self) -> bool {
        !std::mem::replace(&mut self.armed, true)
    }
}

pub struct Accumulator {
    inner: Mutex<Inner>,
    trigger: Trigger,
}

impl Accumulator {
    #[must_use]
    pub fn new(trigger: Trigger) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            trigger,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A writer that panicked mid-append leaves at worst a partial line behind.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `text` verbatim.
    pub fn append(&self, text: &str) {
        self.append_bytes(text.as_bytes());
    }

    pub fn append_bytes(&self, bytes: &[u8]) {
        let armed = {
            let mut inner = self.lock();
            inner.buf.extend_from_slice(bytes);
            inner.arm()
        };
        if armed {
            self.trigger.fire();
        }
    }

    /// Appends one record's body, preceded by `header` when `unit` differs from
    /// the unit of the previous record. A trailing newline is always written.
    pub fn append_unit(&self, unit: &str, header: &str, body: &[u8]) {
        let armed = {
            let mut inner = self.lock();
            if inner.last_unit != unit {
                inner.buf.extend_from_slice(header.as_bytes());
                inner.buf.push(b'\n');
                inner.last_unit.clear();
                inner.last_unit.push_str(unit);
            }
            inner.buf.extend_from_slice(body);
            inner.buf.push(b'\n');
            inner.arm()
        };
        if armed {
            self.trigger.fire();
        }
    }

    /// Takes the whole buffer, leaving it empty, forgetting the unit marker and
    /// returning the dispatcher to idle.
    pub fn drain_and_reset(&self) -> Vec<u8> {
        let mut inner = self.lock();
        inner.last_unit.clear();
        inner.armed = false;
        std::mem::take(&mut inner.buf)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FlushSource for Accumulator {
    fn drain(&self) -> Option<String> {
        let bytes = self.drain_and_reset();
        let text = String::from_utf8_lossy(&bytes);
        if text.trim().is_empty() {
            return None;
        }
        Some(text.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    fn accumulator() -> Accumulator {
        Accumulator::new(Trigger::new())
    }

    #[test]
    fn test_append_then_drain_resets() {
        let acc = accumulator();
        acc.append("hello ");
        acc.append("world");
        assert_eq!(acc.drain_and_reset(), b"hello world");
        assert!(acc.is_empty());
        assert!(acc.drain_and_reset().is_empty());
    }

    #[test]
    fn test_header_written_once_per_unit_run() {
        let acc = accumulator();
        acc.append_unit("foo.service", "svc", b"boot ok");
        acc.append_unit("foo.service", "svc", b"tick");
        acc.append_unit("bar.service", "other", b"hi");
        acc.append_unit("foo.service", "svc", b"back");
        assert_eq!(
            String::from_utf8(acc.drain_and_reset()).expect("utf8"),
            "svc\nboot ok\ntick\nother\nhi\nsvc\nback\n"
        );
    }

    #[test]
    fn test_drain_forgets_unit_marker() {
        let acc = accumulator();
        acc.append_unit("foo.service", "svc", b"one");
        acc.drain_and_reset();
        acc.append_unit("foo.service", "svc", b"two");
        assert_eq!(acc.drain_and_reset(), b"svc\ntwo\n");
    }

    #[test]
    fn test_raw_bytes_are_kept_literally() {
        let acc = accumulator();
        acc.append_unit("u", "exe", &[0x66, 0x6f, 0xff]);
        assert_eq!(acc.drain_and_reset(), vec![b'e', b'x', b'e', b'\n', 0x66, 0x6f, 0xff, b'\n']);
    }

    #[test]
    fn test_flush_source_skips_blank_content() {
        let acc = accumulator();
        assert_eq!(acc.drain(), None);
        acc.append("\n  \n");
        assert_eq!(acc.drain(), None);
        acc.append("line\n");
        assert_eq!(acc.drain(), Some("line\n".to_string()));
    }

    #[test]
    fn test_arm_edge_only_once_until_drained() {
        let mut inner = Inner::default();
        assert!(inner.arm());
        assert!(!inner.arm());
        inner.armed = false;
        assert!(inner.arm());
    }

    #[test]
    fn test_concurrent_appenders_lose_nothing() {
        let acc = Arc::new(accumulator());
        let writers: Vec<_> = (0..8)
            .map(|w| {
                let acc = Arc::clone(&acc);
                thread::spawn(move || {
                    for i in 0..200 {
                        acc.append(&format!("{w}:{i}\n"));
                    }
                })
            })
            .collect();

        let drainer = {
            let acc = Arc::clone(&acc);
            thread::spawn(move || {
                let mut drained = Vec::new();
                for _ in 0..50 {
                    drained.extend(acc.drain_and_reset());
                    thread::yield_now();
                }
                drained
            })
        };

        for writer in writers {
            writer.join().expect("writer panicked");
        }
        let mut drained = drainer.join().expect("drainer panicked");
        drained.extend(acc.drain_and_reset());

        let text = String::from_utf8(drained).expect("utf8");
        let mut lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 8 * 200);
        lines.sort_unstable();
        lines.dedup();
        assert_eq!(lines.len(), 8 * 200);

        // each writer's lines keep their relative order
        for w in 0..8 {
            let prefix = format!("{w}:");
            let seq: Vec<usize> = text
                .lines()
                .filter_map(|l| l.strip_prefix(&prefix))
                .map(|n| n.parse().expect("number"))
                .collect();
            assert_eq!(seq, (0..200).collect::<Vec<_>>());
        }
    }

    proptest! {
        #[test]
        fn prop_drained_snapshots_concatenate_to_appended_text(
            ops in proptest::collection::vec(
                prop_oneof![
                    "[a-z \\n]{0,12}".prop_map(Some),
                    Just(None),
                ],
                0..64,
            )
        ) {
            let acc = accumulator();
            let mut appended = String::new();
            let mut drained = Vec::new();
            for op in ops {
                match op {
                    Some(text) => {
                        acc.append(&text);
                        appended.push_str(&text);
                    }
                    None => drained.extend(acc.drain_and_reset()),
                }
            }
            drained.extend(acc.drain_and_reset());
            prop_assert_eq!(String::from_utf8(drained).expect("utf8"), appended);
        }
    }
}
