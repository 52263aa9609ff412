// This file is part of Gear.
//
// Copyright (C) 2024-2025 Gear Technologies Inc.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Frames pushed to live clients and the agent output they are built from.

use crate::{FailureReason, MessageId};
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Typed unit of output pushed to live clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    MessageReceived {
        id: MessageId,
        payer: Address,
        content: String,
    },
    ToolCall {
        id: MessageId,
        tool: String,
        content: String,
    },
    ToolResult {
        id: MessageId,
        content: String,
    },
    AgentText {
        id: MessageId,
        content: String,
    },
    Error {
        id: MessageId,
        reason: FailureReason,
        message: String,
    },
    Complete {
        id: MessageId,
        success: bool,
        marked_processed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack_tx_hash: Option<B256>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Frame {
    pub fn id(&self) -> MessageId {
        match self {
            Self::MessageReceived { id, .. }
            | Self::ToolCall { id, .. }
            | Self::ToolResult { id, .. }
            | Self::AgentText { id, .. }
            | Self::Error { id, .. }
            | Self::Complete { id, .. } => *id,
        }
    }

    /// Value of the `type` discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageReceived { .. } => "message_received",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::AgentText { .. } => "agent_text",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
        }
    }
}

/// One chunk of output streamed by the external agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentChunk {
    ToolCall {
        tool: String,
        #[serde(default)]
        arguments: String,
    },
    ToolResult {
        content: String,
    },
    AgentText {
        content: String,
    },
}

impl AgentChunk {
    pub fn into_frame(self, id: MessageId) -> Frame {
        match self {
            Self::ToolCall { tool, arguments } => Frame::ToolCall {
                id,
                tool,
                content: tool_call_content(&arguments),
            },
            Self::ToolResult { content } => Frame::ToolResult { id, content },
            Self::AgentText { content } => Frame::AgentText { id, content },
        }
    }
}

/// Renders tool call arguments for display.
///
/// Single-argument tools carry their input under `__arg1`, which is unwrapped.
/// Other JSON is pretty-printed, anything else is passed through.
pub fn tool_call_content(arguments: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(arguments) else {
        return arguments.to_string();
    };

    match value.get("__arg1") {
        Some(Value::String(arg)) => arg.clone(),
        Some(arg) => arg.to_string(),
        None => serde_json::to_string_pretty(&value).unwrap_or_else(|_| arguments.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> MessageId {
        MessageId::from([0xab; 32])
    }

    #[test]
    fn frames_carry_type_and_id() {
        let frame = Frame::AgentText {
            id: id(),
            content: "Deposited".into(),
        };

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "agent_text");
        assert_eq!(json["id"], format!("0x{}", "ab".repeat(32)));
        assert_eq!(json["content"], "Deposited");
        assert_eq!(frame.kind(), "agent_text");
        assert_eq!(frame.id(), id());
    }

    #[test]
    fn complete_frame_skips_empty_fields() {
        let frame = Frame::Complete {
            id: id(),
            success: true,
            marked_processed: true,
            ack_tx_hash: None,
            error: None,
        };

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "complete");
        assert!(json.get("ack_tx_hash").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn tool_call_arguments() {
        assert_eq!(tool_call_content(r#"{"__arg1": "USDC"}"#), "USDC");
        assert_eq!(tool_call_content(r#"{"__arg1": 100}"#), "100");
        assert_eq!(
            tool_call_content(r#"{"asset":"USDC"}"#),
            "{\n  \"asset\": \"USDC\"\n}"
        );
        assert_eq!(tool_call_content("not json"), "not json");
    }

    #[test]
    fn agent_chunk_from_ndjson() {
        let chunk: AgentChunk =
            serde_json::from_str(r#"{"type":"tool_call","tool":"balance","arguments":"{}"}"#)
                .unwrap();

        let Frame::ToolCall { tool, content, .. } = chunk.into_frame(id()) else {
            panic!("unexpected frame");
        };

        assert_eq!(tool, "balance");
        assert_eq!(content, "{}");
    }
}
