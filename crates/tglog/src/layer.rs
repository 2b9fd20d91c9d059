// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `tracing` layer that forwards the process's own log events.
//!
//! Events at or above the configured level are rendered as
//! `LEVEL message key=value ...` and recorded in a [`DedupStore`] keyed by
//! that text, with the `file:line` of the call site as location. Events
//! emitted from this crate or from the HTTP stack beneath the transport are
//! never captured: a delivery failure would otherwise schedule another
//! delivery of its own error.

use std::backtrace::Backtrace;
use std::fmt::{self, Write};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::dedup::DedupStore;

const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");

const MUTED_TARGETS: [&str; 6] = [OWN_TARGET, "h2", "hyper", "hyper_util", "rustls", "reqwest"];

/// Target of the events emitted by [`install_panic_hook`].
pub const PANIC_TARGET: &str = "panic";

pub struct NotifyLayer {
    store: Arc<DedupStore>,
    level: Level,
}

impl NotifyLayer {
    #[must_use]
    pub fn new(store: Arc<DedupStore>, level: Level) -> Self {
        Self { store, level }
    }

    fn is_muted(target: &str) -> bool {
        MUTED_TARGETS.iter().any(|muted| {
            target
                .strip_prefix(muted)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
        })
    }
}

impl<S: Subscriber> Layer<S> for NotifyLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // more verbose levels compare greater
        if *metadata.level() > self.level || Self::is_muted(metadata.target()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let location = match (metadata.file(), metadata.line()) {
            (Some(file), Some(line)) => format!("{}:{line}", short_path(file)),
            _ => metadata.target().to_string(),
        };
        self.store
            .record(visitor.finish(*metadata.level()), location);
    }
}

/// Replaces the panic hook with one that logs the panic and a backtrace as
/// an error event under [`PANIC_TARGET`], so a [`NotifyLayer`] forwards it.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| log_panic(&info.to_string())));
}

fn log_panic(description: &str) {
    let backtrace = Backtrace::force_capture();
    tracing::error!(target: PANIC_TARGET, "{description}\nstack trace:\n{backtrace}");
}

/// Keeps the last two path components: `src/main.rs`.
fn short_path(file: &str) -> &str {
    let mut separators = file.rmatch_indices(|c| c == '/' || c == '\\').map(|(i, _)| i);
    match (separators.next(), separators.next()) {
        (Some(_), Some(parent)) => &file[parent + 1..],
        _ => file,
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self, level: Level) -> String {
        let mut out = format!("{level} {}", self.message);
        out.push_str(&self.fields);
        out
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}
