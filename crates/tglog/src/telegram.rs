// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bot API transport: one `sendMessage` POST per recipient.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::errors::TransportError;
use crate::sender::Transport;

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Clone)]
pub struct TelegramTransport {
    client: reqwest::Client,
    // carries the bot token, never log it
    endpoint: String,
    parse_mode: Option<String>,
}

impl TelegramTransport {
    /// `timeout` bounds each request; the sender applies its own per-recipient
    /// timeout on top.
    pub fn new(
        api_url: &str,
        token: &str,
        parse_mode: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/bot{token}/sendMessage", api_url.trim_end_matches('/')),
            parse_mode,
        })
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send(&self, recipient: i64, text: &str) -> Result<(), TransportError> {
        let body = SendMessage {
            chat_id: recipient,
            text,
            parse_mode: self.parse_mode.as_deref(),
        };
        // reqwest errors render the request url, which embeds the token
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;
        let status = resp.status();
        let raw = resp.text().await.map_err(reqwest::Error::without_url)?;
        trace!("sendMessage to {recipient} answered {status}: {raw}");

        match serde_json::from_str::<ApiResponse>(&raw) {
            Ok(ApiResponse { ok: true, .. }) if status.is_success() => Ok(()),
            Ok(api) => Err(TransportError::Rejected {
                code: api.error_code.unwrap_or_else(|| i64::from(status.as_u16())),
                description: api.description.unwrap_or_default(),
            }),
            Err(_) => Err(TransportError::UnexpectedResponse {
                status: status.as_u16(),
                body: raw,
            }),
        }
    }
}

impl fmt::Debug for TelegramTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramTransport")
            .field("parse_mode", &self.parse_mode)
            .finish_non_exhaustive()
    }
}
