// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Coalescing log forwarder.
//!
//! Journal records are filtered by unit and appended to an [`accumulator`];
//! the process's own log events are deduplicated into a [`dedup`] store.
//! Each store is drained by a [`debounce`] dispatcher, which turns a burst of
//! writes into one message and hands it to the [`sender`] for delivery to
//! every recipient.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod accumulator;
pub mod config;
pub mod debounce;
pub mod dedup;
pub mod errors;
pub mod layer;
pub mod payload;
pub mod record;
pub mod sender;
pub mod tailer;
pub mod telegram;
