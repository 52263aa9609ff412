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

use crate::{AgentChunk, MessageId};
use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

/// Terminal failure reasons of a processing job.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    #[display("content missing")]
    ContentMissing,
    #[display("agent error")]
    AgentError,
    #[display("acknowledgement failed")]
    AckFailed,
}

/// State of a processing job.
///
/// Jobs only move one step forward along
/// `Received -> ContentFetched -> Processing -> Acknowledging -> Broadcast -> Done`,
/// or jump to `Failed` from any non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum JobState {
    Received,
    ContentFetched,
    Processing,
    Acknowledging,
    Broadcast,
    Done,
    #[display("failed ({_0})")]
    Failed(FailureReason),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }

    fn position(&self) -> u8 {
        match self {
            Self::Received => 0,
            Self::ContentFetched => 1,
            Self::Processing => 2,
            Self::Acknowledging => 3,
            Self::Broadcast => 4,
            Self::Done => 5,
            Self::Failed(_) => u8::MAX,
        }
    }

    /// Returns `true` if `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        if self.is_terminal() {
            return false;
        }

        match next {
            Self::Failed(_) => true,
            next => next.position() == self.position() + 1,
        }
    }
}

/// Point-in-time view of a job, served to status queries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: MessageId,
    pub state: JobState,
    /// Resolved message content, set once fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Agent output in the order it was streamed.
    #[serde(default)]
    pub result_chunks: Vec<AgentChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_tx_hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobSnapshot {
    /// Snapshot of a job that has just been admitted.
    pub fn received(id: MessageId) -> Self {
        Self {
            id,
            state: JobState::Received,
            content: None,
            result_chunks: Vec::new(),
            ack_tx_hash: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HAPPY_PATH: [JobState; 6] = [
        JobState::Received,
        JobState::ContentFetched,
        JobState::Processing,
        JobState::Acknowledging,
        JobState::Broadcast,
        JobState::Done,
    ];

    #[test]
    fn forward_only_transitions() {
        for pair in HAPPY_PATH.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{pair:?}");
            assert!(!pair[1].can_transition_to(&pair[0]), "{pair:?}");
        }

        assert!(!JobState::Received.can_transition_to(&JobState::Processing));
        assert!(!JobState::Processing.can_transition_to(&JobState::Processing));
    }

    #[test]
    fn failed_reachable_from_non_terminal_only() {
        let failed = JobState::Failed(FailureReason::AgentError);

        for state in &HAPPY_PATH[..5] {
            assert!(state.can_transition_to(&failed));
        }

        assert!(!JobState::Done.can_transition_to(&failed));
        assert!(!failed.can_transition_to(&JobState::Done));
        assert!(!failed.can_transition_to(&JobState::Failed(FailureReason::AckFailed)));
    }

    #[test]
    fn state_serialization() {
        let json = serde_json::to_value(JobState::Failed(FailureReason::ContentMissing)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "state": "failed", "reason": "content_missing" })
        );

        let json = serde_json::to_value(JobState::ContentFetched).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "content_fetched" }));
    }
}
