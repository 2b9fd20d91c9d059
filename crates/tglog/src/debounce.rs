// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Coalesces bursts of accumulated content into single flushes.
//!
//! A dispatcher is either idle or pending. The first write into an idle
//! [`FlushSource`] arms it (under the source's own lock) and fires the
//! [`Trigger`]; the dispatcher then waits out the quiet window and drains.
//! Writes that land while pending only grow the content the scheduled flush
//! will take, so a burst costs one flush and waits at most one window.
//!
//! # Strategies
//!
//! - `debounce,<ms>`: one-shot window started by the first write (default, 3s)
//! - `periodic,<ms>`: unconditional tick, flushing only when content is pending

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::ConfigError;
use crate::payload::PayloadFormat;
use crate::sender::{DispatchReport, Sender};

pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_secs(3);

/// Something a dispatcher can drain.
pub trait FlushSource: Send + Sync {
    /// Takes all pending content and returns the source to idle.
    /// Returns `None` when nothing worth sending was pending.
    fn drain(&self) -> Option<String>;
}

/// Wakes a dispatcher on the idle to pending edge.
///
/// A fire with no dispatcher waiting is remembered, so an arm that races the
/// dispatcher reaching its wait point is never lost.
#[derive(Clone, Debug, Default)]
pub struct Trigger {
    notify: Arc<Notify>,
}

impl Trigger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fire(&self) {
        self.notify.notify_one();
    }

    async fn fired(&self) {
        self.notify.notified().await;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushStrategy {
    /// Flush once `window` after the first write following an idle period.
    Debounce(Duration),
    /// Wake every `period` and flush if anything is pending.
    Periodic(Duration),
}

impl Default for FlushStrategy {
    fn default() -> Self {
        Self::Debounce(DEFAULT_QUIET_WINDOW)
    }
}

impl FlushStrategy {
    #[must_use]
    pub fn window(&self) -> Duration {
        match self {
            Self::Debounce(window) | Self::Periodic(window) => *window,
        }
    }
}

impl fmt::Display for FlushStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debounce(window) => write!(f, "debounce,{}", window.as_millis()),
            Self::Periodic(period) => write!(f, "periodic,{}", period.as_millis()),
        }
    }
}

/// Parses `debounce`, `debounce,<ms>`, `periodic` or `periodic,<ms>`.
/// A bare `periodic` ticks every second.
impl FromStr for FlushStrategy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidFlushStrategy(value.to_string());
        let mut split = value.trim().splitn(2, ',');
        let kind = split.next().unwrap_or_default().trim().to_lowercase();
        let millis = match split.next() {
            Some(ms) => Some(ms.trim().parse::<u64>().map_err(|_| invalid())?),
            None => None,
        };
        if millis == Some(0) {
            return Err(invalid());
        }
        match kind.as_str() {
            "debounce" => Ok(Self::Debounce(
                millis.map_or(DEFAULT_QUIET_WINDOW, Duration::from_millis),
            )),
            "periodic" => Ok(Self::Periodic(
                millis.map_or(Duration::from_secs(1), Duration::from_millis),
            )),
            _ => Err(invalid()),
        }
    }
}

/// Drains one [`FlushSource`] according to a [`FlushStrategy`] and hands the
/// rendered messages to the [`Sender`].
pub struct Dispatcher<S> {
    source: Arc<S>,
    trigger: Trigger,
    strategy: FlushStrategy,
    sender: Arc<Sender>,
    format: PayloadFormat,
}

impl<S: FlushSource + 'static> Dispatcher<S> {
    /// `trigger` must be the one `source` fires when it arms.
    #[must_use]
    pub fn new(
        source: Arc<S>,
        trigger: Trigger,
        strategy: FlushStrategy,
        sender: Arc<Sender>,
        format: PayloadFormat,
    ) -> Self {
        Self {
            source,
            trigger,
            strategy,
            sender,
            format,
        }
    }

    /// Runs until `cancel` fires, then flushes whatever is still pending.
    pub async fn run(self, cancel: CancellationToken) {
        debug!("Dispatcher started with strategy {}", self.strategy);
        match self.strategy {
            FlushStrategy::Debounce(window) => self.run_debounced(window, &cancel).await,
            FlushStrategy::Periodic(period) => self.run_periodic(period, &cancel).await,
        }
        debug!("Dispatcher cancelled, flushing pending content");
        self.flush().await;
        debug!("Dispatcher stopped");
    }

    async fn run_debounced(&self, window: Duration, cancel: &CancellationToken) {
        loop {
            tokio::select! {
                () = self.trigger.fired() => {}
                () = cancel.cancelled() => return,
            }
            tokio::select! {
                () = sleep(window) => {}
                () = cancel.cancelled() => return,
            }
            self.flush().await;
        }
    }

    async fn run_periodic(&self, period: Duration, cancel: &CancellationToken) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush().await;
                }
                () = cancel.cancelled() => return,
            }
        }
    }

    /// Drains the source and delivers it. Returns one report per message sent,
    /// empty when nothing was pending.
    pub async fn flush(&self) -> Vec<DispatchReport> {
        let Some(body) = self.source.drain() else {
            return Vec::new();
        };
        let messages = self.format.render(&body);
        if messages.len() > 1 {
            warn!("Payload exceeds the message limit, splitting into {} messages", messages.len());
        }
        let mut reports = Vec::with_capacity(messages.len());
        for message in &messages {
            reports.push(self.sender.dispatch(message).await);
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::Accumulator;
    use crate::errors::TransportError;
    use crate::sender::{RecipientList, Transport};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(i64, String, Instant)>>,
    }

    impl RecordingTransport {
        fn sent(&self) -> Vec<(i64, String, Instant)> {
            self.sent.lock().expect("lock poisoned").clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, recipient: i64, text: &str) -> Result<(), TransportError> {
            self.sent
                .lock()
                .expect("lock poisoned")
                .push((recipient, text.to_string(), Instant::now()));
            Ok(())
        }
    }

    fn setup(
        strategy: FlushStrategy,
    ) -> (Arc<Accumulator>, Arc<RecordingTransport>, Dispatcher<Accumulator>) {
        let trigger = Trigger::new();
        let accumulator = Arc::new(Accumulator::new(trigger.clone()));
        let transport = Arc::new(RecordingTransport::default());
        let sender = Arc::new(Sender::new(
            Some(transport.clone() as Arc<dyn Transport>),
            RecipientList::from(vec![1]),
            Duration::from_secs(5),
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&accumulator),
            trigger,
            strategy,
            sender,
            PayloadFormat::CodeBlock,
        );
        (accumulator, transport, dispatcher)
    }

    #[test]
    fn test_parse_flush_strategy() {
        assert_eq!(
            "debounce,2500".parse::<FlushStrategy>(),
            Ok(FlushStrategy::Debounce(Duration::from_millis(2500)))
        );
        assert_eq!(
            "debounce".parse::<FlushStrategy>(),
            Ok(FlushStrategy::Debounce(DEFAULT_QUIET_WINDOW))
        );
        assert_eq!(
            " Periodic , 1000 ".parse::<FlushStrategy>(),
            Ok(FlushStrategy::Periodic(Duration::from_secs(1)))
        );
        assert_eq!(
            "periodic".parse::<FlushStrategy>(),
            Ok(FlushStrategy::Periodic(Duration::from_secs(1)))
        );
    }

    #[test]
    fn test_parse_flush_strategy_rejects_garbage() {
        for value in ["", "end", "debounce,abc", "periodic,0", "debounce,-5"] {
            assert_eq!(
                value.parse::<FlushStrategy>(),
                Err(ConfigError::InvalidFlushStrategy(value.to_string())),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn test_flush_strategy_display_round_trips() {
        let strategy = FlushStrategy::Periodic(Duration::from_millis(750));
        assert_eq!(strategy.to_string().parse::<FlushStrategy>(), Ok(strategy));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_flush_within_window() {
        let window = Duration::from_secs(2);
        let (accumulator, transport, dispatcher) = setup(FlushStrategy::Debounce(window));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatcher.run(cancel.clone()));
        tokio::task::yield_now().await;

        let first = Instant::now();
        for i in 0..30 {
            accumulator.append(&format!("line {i}\n"));
            sleep(Duration::from_millis(50)).await;
        }
        sleep(window * 2).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 1, "burst should produce exactly one message");
        let (_, text, at) = &sent[0];
        assert!(text.contains("line 0\n") && text.contains("line 29"));
        assert!(*at - first <= window, "flush came {:?} after first write", *at - first);

        cancel.cancel();
        task.await.expect("dispatcher panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_load_does_not_postpone_flush() {
        let window = Duration::from_secs(1);
        let (accumulator, transport, dispatcher) = setup(FlushStrategy::Debounce(window));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatcher.run(cancel.clone()));
        tokio::task::yield_now().await;

        // a write every 100ms for 3.5s never leaves a quiet gap
        for i in 0..35 {
            accumulator.append(&format!("{i}\n"));
            sleep(Duration::from_millis(100)).await;
        }
        sleep(window * 2).await;
        cancel.cancel();
        task.await.expect("dispatcher panicked");

        let sent = transport.sent();
        assert!(sent.len() >= 3, "expected periodic progress, got {}", sent.len());
        let joined: String = sent
            .iter()
            .map(|(_, text, _)| text.trim_start_matches("```\n").trim_end_matches("\n```"))
            .collect::<Vec<_>>()
            .join("\n");
        let numbers: Vec<usize> = joined.lines().map(|n| n.parse().expect("number")).collect();
        assert_eq!(numbers, (0..35).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_dispatcher_never_sends() {
        let (_accumulator, transport, dispatcher) = setup(FlushStrategy::Debounce(Duration::from_secs(1)));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatcher.run(cancel.clone()));
        sleep(Duration::from_secs(30)).await;
        cancel.cancel();
        task.await.expect("dispatcher panicked");
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flushes_only_pending_content() {
        let (accumulator, transport, dispatcher) = setup(FlushStrategy::Periodic(Duration::from_secs(1)));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatcher.run(cancel.clone()));
        tokio::task::yield_now().await;

        accumulator.append("a\n");
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(transport.sent().len(), 1);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.sent().len(), 1, "empty ticks must not send");

        accumulator.append("b\n");
        sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.sent().len(), 2);

        cancel.cancel();
        task.await.expect("dispatcher panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_flushes_pending_content() {
        let (accumulator, transport, dispatcher) = setup(FlushStrategy::Debounce(Duration::from_secs(60)));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatcher.run(cancel.clone()));
        tokio::task::yield_now().await;

        accumulator.append("last words\n");
        sleep(Duration::from_secs(1)).await;
        assert!(transport.sent().is_empty());

        cancel.cancel();
        task.await.expect("dispatcher panicked");
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "```\nlast words\n```");
    }

    #[tokio::test]
    async fn test_flush_on_empty_source_sends_nothing() {
        let (_accumulator, transport, dispatcher) = setup(FlushStrategy::default());
        assert!(dispatcher.flush().await.is_empty());
        assert!(transport.sent().is_empty());
    }
}
