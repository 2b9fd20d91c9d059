// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the forwarding pipeline.
//!
//! Per-record and per-recipient errors are contained at the component that
//! produced them and surfaced through `tracing`. Only [`StartupError`] is
//! meant to terminate the process.

use std::time::Duration;

/// A single input line could not be decoded into a record.
#[derive(Debug, thiserror::Error)]
#[error("failed to decode record: {source}; line: {line}")]
pub struct DecodeError {
    /// The offending raw line, kept for diagnosis.
    pub line: String,
    #[source]
    pub source: serde_json::Error,
}

/// Missing or malformed configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid recipient id '{0}': expected a signed 64-bit integer")]
    InvalidRecipient(String),

    #[error("invalid flush strategy '{0}'")]
    InvalidFlushStrategy(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Delivery to one recipient failed.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("rejected by api ({code}): {description}")]
    Rejected { code: i64, description: String },

    #[error("unexpected response ({status}): {body}")]
    UnexpectedResponse { status: u16, body: String },
}

/// The log source could not be brought up or was lost.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to spawn source command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("source command has no stdout pipe")]
    MissingStdout,

    #[error("failed to wait on source command: {0}")]
    Wait(#[source] std::io::Error),

    #[error("source command exited with {0}")]
    Exited(std::process::ExitStatus),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
