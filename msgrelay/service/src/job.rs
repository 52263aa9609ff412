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

use crate::{
    agent::{Agent, AgentError},
    tracker::JobHandle,
};
use futures::StreamExt;
use msgrelay_common::{ChainEvent, FailureReason, Frame, JobSnapshot, JobState};
use msgrelay_ethereum::{AckOutcome, AckSubmitter, primitives::B256};
use msgrelay_observer::MessageFetcher;
use msgrelay_rpc::BroadcastHub;
use std::{sync::Arc, time::Duration};

pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(300);

/// Collaborators shared by all jobs.
#[derive(Clone)]
pub struct JobContext {
    pub fetcher: MessageFetcher,
    pub agent: Arc<dyn Agent>,
    pub submitter: Arc<AckSubmitter>,
    pub hub: BroadcastHub,
    pub agent_timeout: Duration,
}

/// Drives one paid message from content fetch to the final frame.
pub struct Job {
    handle: JobHandle,
    event: ChainEvent,
    ctx: JobContext,
}

impl Job {
    pub fn new(handle: JobHandle, event: ChainEvent, ctx: JobContext) -> Self {
        debug_assert_eq!(handle.id(), event.id);

        Self { handle, event, ctx }
    }

    /// Runs the job to a terminal state, returning its final snapshot.
    pub async fn run(mut self) -> Option<JobSnapshot> {
        let id = self.event.id;

        tracing::info!(
            %id,
            payer = %self.event.payer,
            block = self.event.block_number,
            "📨 Processing paid message"
        );

        let content = match self.ctx.fetcher.fetch(&self.event).await {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(%id, error = %err, "Message content is missing, skipping");
                return self.fail(FailureReason::ContentMissing, err.to_string(), None);
            }
        };

        self.handle.set_content(content.clone());
        if !self.advance(JobState::ContentFetched) {
            return self.handle.snapshot();
        }
        self.publish(Frame::MessageReceived {
            id,
            payer: self.event.payer,
            content: content.clone(),
        });

        if !self.advance(JobState::Processing) {
            return self.handle.snapshot();
        }
        let agent_error = match self.run_agent(content).await {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(%id, error = %err, "Agent failed, acknowledging anyway");

                let message = err.to_string();
                self.handle.set_error(message.clone());
                self.publish(Frame::Error {
                    id,
                    reason: FailureReason::AgentError,
                    message: message.clone(),
                });

                Some(message)
            }
        };

        if !self.advance(JobState::Acknowledging) {
            return self.handle.snapshot();
        }
        let outcome = match self.ctx.submitter.submit_ack(id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(%id, error = %err, "Acknowledgement failed, operator action required");
                let tx_hash = err.tx_hash();
                return self.fail(FailureReason::AckFailed, err.to_string(), tx_hash);
            }
        };

        match outcome {
            AckOutcome::Confirmed(tx_hash) => {
                tracing::info!(%id, %tx_hash, "✅ Message marked as processed");
                self.handle.set_ack_tx_hash(tx_hash);
            }
            AckOutcome::AlreadyProcessed => {
                tracing::warn!(%id, "Message was marked as processed by someone else");
            }
        }

        if !self.advance(JobState::Broadcast) {
            return self.handle.snapshot();
        }
        self.publish(Frame::Complete {
            id,
            success: agent_error.is_none(),
            marked_processed: true,
            ack_tx_hash: outcome.tx_hash(),
            error: agent_error.clone(),
        });

        self.advance(match agent_error {
            None => JobState::Done,
            Some(_) => JobState::Failed(FailureReason::AgentError),
        });

        self.handle.snapshot()
    }

    async fn run_agent(&self, content: String) -> Result<(), AgentError> {
        let id = self.event.id;
        let timeout = self.ctx.agent_timeout;

        let drive = async {
            let mut chunks = self.ctx.agent.process(content).await?;

            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                self.handle.record_chunk(chunk.clone());
                self.publish(chunk.into_frame(id));
            }

            Ok(())
        };

        tokio::time::timeout(timeout, drive)
            .await
            .unwrap_or(Err(AgentError::Timeout(timeout)))
    }

    /// Reports the failure to live clients and retires the job.
    fn fail(
        mut self,
        reason: FailureReason,
        message: String,
        ack_tx_hash: Option<B256>,
    ) -> Option<JobSnapshot> {
        let id = self.event.id;

        if let Some(tx_hash) = ack_tx_hash {
            self.handle.set_ack_tx_hash(tx_hash);
        }
        self.handle.set_error(message.clone());
        self.publish(Frame::Error {
            id,
            reason,
            message,
        });
        self.publish(Frame::Complete {
            id,
            success: false,
            marked_processed: false,
            ack_tx_hash,
            error: self.handle.snapshot().and_then(|snapshot| snapshot.error),
        });

        self.advance(JobState::Failed(reason));
        self.handle.snapshot()
    }

    /// Moves the job on. `false` means the job no longer owns its entry and
    /// must stop.
    fn advance(&mut self, next: JobState) -> bool {
        if self.handle.transition(next) {
            return true;
        }

        tracing::error!(id = %self.event.id, %next, "job lost its tracker entry, stopping");
        false
    }

    fn publish(&self, frame: Frame) {
        self.ctx.hub.publish(&frame);
    }
}
