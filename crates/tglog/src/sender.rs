// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fan-out of one payload to every configured recipient.
//!
//! Recipients are attempted concurrently, each under its own timeout, and a
//! failure for one never prevents delivery to the others. With no recipients
//! (or no transport) the payload goes to a local [`Fallback`] instead, so
//! nothing is discarded silently.

use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, error};

use crate::errors::{ConfigError, TransportError};

/// Delivers a text message to one recipient.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, recipient: i64, text: &str) -> Result<(), TransportError>;
}

/// Local sink used when there is nobody to deliver to.
pub trait Fallback: Send + Sync {
    fn emit(&self, payload: &str);
}

/// Writes fallback payloads to standard error.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrFallback;

impl Fallback for StderrFallback {
    fn emit(&self, payload: &str) {
        let mut stderr = std::io::stderr().lock();
        if let Err(e) = writeln!(stderr, "{payload}") {
            error!("Failed to write fallback payload to stderr: {e}");
        }
    }
}

/// Ordered, immutable list of recipient ids.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecipientList(Arc<[i64]>);

impl RecipientList {
    /// Parses a comma separated list of ids. Blank entries are ignored;
    /// malformed ones are skipped and returned alongside the list.
    #[must_use]
    pub fn parse(raw: &str) -> (Self, Vec<ConfigError>) {
        let mut ids = Vec::new();
        let mut errors = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.parse::<i64>() {
                Ok(id) => ids.push(id),
                Err(_) => errors.push(ConfigError::InvalidRecipient(entry.to_string())),
            }
        }
        (Self(ids.into()), errors)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.0.iter().copied()
    }
}

impl From<Vec<i64>> for RecipientList {
    fn from(ids: Vec<i64>) -> Self {
        Self(ids.into())
    }
}

#[derive(Debug)]
pub struct RecipientOutcome {
    pub recipient: i64,
    pub result: Result<(), TransportError>,
}

/// What happened to one dispatched payload.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// One entry per recipient, in recipient list order.
    pub outcomes: Vec<RecipientOutcome>,
    /// Set when the payload went to the fallback sink instead.
    pub fallback: bool,
}

impl DispatchReport {
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }
}

pub struct Sender {
    transport: Option<Arc<dyn Transport>>,
    recipients: RecipientList,
    timeout: Duration,
    fallback: Arc<dyn Fallback>,
}

impl Sender {
    #[must_use]
    pub fn new(
        transport: Option<Arc<dyn Transport>>,
        recipients: RecipientList,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            recipients,
            timeout,
            fallback: Arc::new(StderrFallback),
        }
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn Fallback>) -> Self {
        self.fallback = fallback;
        self
    }

    #[must_use]
    pub fn recipients(&self) -> &RecipientList {
        &self.recipients
    }

    /// Delivers `payload` to every recipient independently.
    pub async fn dispatch(&self, payload: &str) -> DispatchReport {
        let transport = match &self.transport {
            Some(transport) if !self.recipients.is_empty() => transport,
            _ => {
                self.fallback.emit(payload);
                return DispatchReport {
                    outcomes: Vec::new(),
                    fallback: true,
                };
            }
        };

        let attempts = self.recipients.iter().map(|recipient| {
            let transport = Arc::clone(transport);
            async move {
                let result = match timeout(self.timeout, transport.send(recipient, payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout(self.timeout)),
                };
                match &result {
                    Ok(()) => debug!("Delivered {} bytes to {recipient}", payload.len()),
                    Err(e) => error!("Failed to deliver payload to {recipient}: {e}"),
                }
                RecipientOutcome { recipient, result }
            }
        });

        DispatchReport {
            outcomes: join_all(attempts).await,
            fallback: false,
        }
    }
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("has_transport", &self.transport.is_some())
            .field("recipients", &self.recipients)
            .field("timeout", &self.timeout)
            .finish()
    }
}
