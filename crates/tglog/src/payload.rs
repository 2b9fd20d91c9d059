// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns a drained body into one or more outbound chat messages.

/// Upper bound on a single message, in characters, enforced by the chat API.
pub const MAX_MESSAGE_CHARS: usize = 4096;

const FENCE_CLOSE: &str = "\n```";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Plain fenced block.
    CodeBlock,
    /// Fenced `sh` block whose first line names the emitting executable.
    Shell { header: String },
}

impl PayloadFormat {
    fn fence_open(&self) -> String {
        match self {
            Self::CodeBlock => "```\n".to_string(),
            Self::Shell { header } => format!("```sh\n{header}\n"),
        }
    }

    /// Renders `body` into messages no longer than [`MAX_MESSAGE_CHARS`].
    /// Blank bodies produce no messages.
    #[must_use]
    pub fn render(&self, body: &str) -> Vec<String> {
        self.render_with_limit(body, MAX_MESSAGE_CHARS)
    }

    #[must_use]
    pub fn render_with_limit(&self, body: &str, limit: usize) -> Vec<String> {
        let body = body.trim_end();
        if body.trim().is_empty() {
            return Vec::new();
        }
        let open = self.fence_open();
        let budget = limit
            .saturating_sub(open.chars().count() + FENCE_CLOSE.len())
            .max(1);
        split_lines(body, budget)
            .into_iter()
            .map(|chunk| format!("{open}{chunk}{FENCE_CLOSE}"))
            .collect()
    }
}

/// Packs whole lines into chunks of at most `budget` chars. A line longer than
/// the budget is cut on char boundaries.
fn split_lines(body: &str, budget: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in body.split('\n') {
        let line_len = line.chars().count();
        let needed = if current.is_empty() {
            line_len
        } else {
            current_len + 1 + line_len
        };
        if needed <= budget {
            if !current.is_empty() {
                current.push('\n');
                current_len += 1;
            }
            current.push_str(line);
            current_len += line_len;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len <= budget {
            current.push_str(line);
            current_len = line_len;
            continue;
        }

        for ch in line.chars() {
            if current_len == budget {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push(ch);
            current_len += 1;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
