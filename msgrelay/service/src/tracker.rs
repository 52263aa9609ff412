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

//! Active job table: at most one live job per message id.

use msgrelay_common::{AgentChunk, FailureReason, JobSnapshot, JobState, MessageId};
use msgrelay_ethereum::{ChainReader, primitives::B256, retry::RetryPolicy};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

/// Number of finished jobs kept for status queries.
pub const RECENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("a job for this message is already active")]
    AlreadyActive,
    #[error("message is already processed on chain")]
    AlreadyProcessed,
    #[error("a previous acknowledgement of this message failed, waiting for operator release")]
    AwaitingOperator,
    #[error("processed flag could not be read")]
    Unverified,
}

#[derive(Default)]
struct Inner {
    active: HashMap<MessageId, JobSnapshot>,
    recent: VecDeque<JobSnapshot>,
    /// Messages consumed by the agent whose acknowledgement is not known to
    /// have landed. Only [`JobTracker::release`] lets them in again.
    held: HashSet<MessageId>,
}

impl Inner {
    fn retire(&mut self, id: MessageId) -> Option<JobSnapshot> {
        let snapshot = self.active.remove(&id)?;

        if matches!(
            snapshot.state,
            JobState::Failed(FailureReason::AckFailed) | JobState::Acknowledging
        ) {
            tracing::error!(%id, state = %snapshot.state, "message held until released by operator");
            self.held.insert(id);
        }

        if self.recent.len() == RECENT_CAPACITY {
            self.recent.pop_back();
        }
        self.recent.push_front(snapshot.clone());

        Some(snapshot)
    }
}

/// Deduplicates chain events and keeps the state of every job.
#[derive(Clone)]
pub struct JobTracker {
    reader: Arc<dyn ChainReader>,
    inner: Arc<Mutex<Inner>>,
    max_active: usize,
}

impl JobTracker {
    pub fn new(reader: Arc<dyn ChainReader>, max_active: usize) -> Self {
        Self {
            reader,
            inner: Default::default(),
            max_active: max_active.max(1),
        }
    }

    /// Admits a job for `id` unless one is active or the chain says it's done.
    pub async fn accept(&self, id: MessageId) -> Result<JobHandle, Rejection> {
        let mut handle = self.reserve(id)?;
        handle.verify().await?;
        Ok(handle)
    }

    /// Claims `id` in the active table without asking the chain.
    ///
    /// The returned handle must pass [`JobHandle::verify`] before any work.
    pub fn reserve(&self, id: MessageId) -> Result<JobHandle, Rejection> {
        let mut inner = self.inner.lock();
        if inner.held.contains(&id) {
            return Err(Rejection::AwaitingOperator);
        }
        if inner.active.contains_key(&id) {
            return Err(Rejection::AlreadyActive);
        }

        inner.active.insert(id, JobSnapshot::received(id));

        Ok(JobHandle {
            id,
            tracker: self.clone(),
            verified: false,
            finished: None,
        })
    }

    /// Lets a held message be processed again by its next event.
    pub fn release(&self, id: MessageId) -> bool {
        let released = self.inner.lock().held.remove(&id);
        if released {
            tracing::info!(%id, "message released for reprocessing");
        }

        released
    }

    /// Messages waiting for operator release, sorted.
    pub fn held(&self) -> Vec<MessageId> {
        let mut held: Vec<_> = self.inner.lock().held.iter().copied().collect();
        held.sort();
        held
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.active_count() < self.max_active
    }

    pub fn is_active(&self, id: MessageId) -> bool {
        self.inner.lock().active.contains_key(&id)
    }

    /// Active job or, failing that, the most recent finished one for `id`.
    pub fn snapshot(&self, id: MessageId) -> Option<JobSnapshot> {
        let inner = self.inner.lock();
        inner
            .active
            .get(&id)
            .or_else(|| inner.recent.iter().find(|snapshot| snapshot.id == id))
            .cloned()
    }

    pub fn active(&self) -> Vec<JobSnapshot> {
        let mut active: Vec<_> = self.inner.lock().active.values().cloned().collect();
        active.sort_by_key(|snapshot| snapshot.id);
        active
    }

    /// Finished jobs, newest first.
    pub fn recent(&self) -> Vec<JobSnapshot> {
        self.inner.lock().recent.iter().cloned().collect()
    }
}

/// Exclusive write access to one job's entry of the [`JobTracker`].
///
/// The handle owns the entry until the job turns terminal. From then on it
/// only keeps the final snapshot and never touches the table again, since the
/// id may already belong to a newer job.
/// A handle dropped before its job is terminal retires the entry as is.
pub struct JobHandle {
    id: MessageId,
    tracker: JobTracker,
    verified: bool,
    finished: Option<JobSnapshot>,
}

impl JobHandle {
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Checks the contract's processed flag once.
    pub async fn verify(&mut self) -> Result<(), Rejection> {
        match self.tracker.reader.is_processed(self.id).await {
            Ok(false) => {
                self.verified = true;
                Ok(())
            }
            Ok(true) => Err(Rejection::AlreadyProcessed),
            Err(err) => {
                tracing::warn!(id = %self.id, error = %err, "failed to read processed flag");
                Err(Rejection::Unverified)
            }
        }
    }

    /// Checks the processed flag until the chain gives an answer.
    ///
    /// The reservation is kept meanwhile, so duplicates of the event are
    /// rejected as [`Rejection::AlreadyActive`].
    pub async fn verify_until_known(&mut self, backoff: &RetryPolicy) -> Result<(), Rejection> {
        let mut failures = 0;

        loop {
            match self.verify().await {
                Err(Rejection::Unverified) => {
                    let delay = backoff.delay(failures);
                    tracing::debug!(id = %self.id, "retrying processed flag in {delay:?}");

                    tokio::time::sleep(delay).await;
                    failures = failures.saturating_add(1);
                }
                res => return res,
            }
        }
    }

    pub fn snapshot(&self) -> Option<JobSnapshot> {
        if let Some(finished) = &self.finished {
            return Some(finished.clone());
        }

        self.tracker.inner.lock().active.get(&self.id).cloned()
    }

    pub fn state(&self) -> Option<JobState> {
        self.snapshot().map(|snapshot| snapshot.state)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Moves the job to `next`, refusing backward and post-terminal moves.
    ///
    /// Reaching a terminal state retires the job from the active table.
    pub fn transition(&mut self, next: JobState) -> bool {
        if self.finished.is_some() {
            return false;
        }

        let mut inner = self.tracker.inner.lock();
        let Some(snapshot) = inner.active.get_mut(&self.id) else {
            return false;
        };

        let current = snapshot.state;
        if !current.can_transition_to(&next) {
            tracing::error!(id = %self.id, %current, %next, "illegal job transition");
            return false;
        }

        snapshot.state = next;
        tracing::debug!(id = %self.id, from = %current, to = %next, "job transition");

        if next.is_terminal() {
            self.finished = inner.retire(self.id);
        }

        true
    }

    pub fn fail(&mut self, reason: FailureReason, error: impl Into<String>) -> bool {
        self.set_error(error);
        self.transition(JobState::Failed(reason))
    }

    /// Keeps the first content only.
    pub fn set_content(&self, content: impl Into<String>) {
        let content = content.into();
        self.with_snapshot(move |snapshot| {
            snapshot.content.get_or_insert(content);
        });
    }

    pub fn record_chunk(&self, chunk: AgentChunk) {
        self.with_snapshot(move |snapshot| snapshot.result_chunks.push(chunk));
    }

    pub fn set_ack_tx_hash(&self, tx_hash: B256) {
        self.with_snapshot(|snapshot| snapshot.ack_tx_hash = Some(tx_hash));
    }

    pub fn set_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.with_snapshot(move |snapshot| match &mut snapshot.error {
            Some(existing) => {
                existing.push_str("; ");
                existing.push_str(&error);
            }
            None => snapshot.error = Some(error),
        });
    }

    fn with_snapshot<R>(&self, f: impl FnOnce(&mut JobSnapshot) -> R) -> Option<R> {
        if self.finished.is_some() {
            return None;
        }

        self.tracker.inner.lock().active.get_mut(&self.id).map(f)
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        if self.finished.is_some() {
            return;
        }

        let mut inner = self.tracker.inner.lock();

        if !self.verified {
            inner.active.remove(&self.id);
            return;
        }

        if let Some(snapshot) = inner.active.get(&self.id) {
            tracing::warn!(id = %self.id, state = %snapshot.state, "job abandoned");
            inner.retire(self.id);
        }
    }
}
