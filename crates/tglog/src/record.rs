// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One journal entry as emitted by `journalctl -o json`.

use serde::{Deserialize, Deserializer};

use crate::errors::DecodeError;

/// The `MESSAGE` field. The journal emits UTF-8 messages as JSON strings,
/// anything else as an array of byte values, and fields over its size limit
/// as `null`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MessagePayload {
    Text(String),
    Bytes(Vec<u8>),
}

impl Default for MessagePayload {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl MessagePayload {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Record {
    #[serde(rename = "_EXE", default)]
    pub executable: String,
    #[serde(rename = "MESSAGE", default, deserialize_with = "null_as_empty")]
    pub message: MessagePayload,
    #[serde(rename = "_SYSTEMD_UNIT", default)]
    pub unit: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<MessagePayload, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<MessagePayload>::deserialize(deserializer)?.unwrap_or_default())
}

impl Record {
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(line).map_err(|source| DecodeError {
            line: line.to_string(),
            source,
        })
    }
}
