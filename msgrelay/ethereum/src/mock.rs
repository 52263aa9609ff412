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

//! In-memory chain for tests.

use crate::{AckTx, ChainError, ChainReader, TxBackend};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use msgrelay_common::{ChainEvent, MessageId};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

/// Acknowledgement accepted by [`MockChain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentAck {
    pub id: MessageId,
    pub nonce: u64,
    pub tx_hash: B256,
}

#[derive(Default)]
struct State {
    latest_block: u64,
    events: Vec<ChainEvent>,
    contents: HashMap<MessageId, String>,
    processed: HashSet<MessageId>,
    acks: Vec<SentAck>,
    receipts: HashMap<B256, bool>,
    failing_reads: u32,
    failing_sends: u32,
    revert_acks: bool,
    withhold_receipts: bool,
    send_delay: Option<Duration>,
    nonce_reads: u32,
    processed_reads: u32,
    failing_processed_reads: u32,
}

/// Scriptable in-memory `MessageManager` implementing both [`ChainReader`]
/// and [`TxBackend`].
#[derive(Clone, Default)]
pub struct MockChain {
    state: Arc<Mutex<State>>,
}

impl MockChain {
    pub const SENDER: Address = Address::new([0x5e; 20]);

    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an event and moves the chain head to its block.
    pub fn push_event(&self, event: ChainEvent) {
        let mut state = self.state.lock();
        state.latest_block = state.latest_block.max(event.block_number);
        state.events.push(event);
    }

    pub fn set_latest_block(&self, block: u64) {
        self.state.lock().latest_block = block;
    }

    pub fn set_content(&self, id: MessageId, content: impl Into<String>) {
        self.state.lock().contents.insert(id, content.into());
    }

    pub fn mark_processed(&self, id: MessageId) {
        self.state.lock().processed.insert(id);
    }

    pub fn processed(&self, id: MessageId) -> bool {
        self.state.lock().processed.contains(&id)
    }

    /// Next `count` reads fail with a transient error.
    pub fn fail_next_reads(&self, count: u32) {
        self.state.lock().failing_reads = count;
    }

    /// Next `count` processed flag reads fail with a transient error.
    pub fn fail_next_processed_reads(&self, count: u32) {
        self.state.lock().failing_processed_reads = count;
    }

    /// Next `count` sends fail with a transient error.
    pub fn fail_next_sends(&self, count: u32) {
        self.state.lock().failing_sends = count;
    }

    /// Every following acknowledgement is mined but reverts.
    pub fn revert_acks(&self) {
        self.state.lock().revert_acks = true;
    }

    pub fn withhold_receipts(&self, withhold: bool) {
        self.state.lock().withhold_receipts = withhold;
    }

    pub fn set_send_delay(&self, delay: Duration) {
        self.state.lock().send_delay = Some(delay);
    }

    pub fn acks(&self) -> Vec<SentAck> {
        self.state.lock().acks.clone()
    }

    pub fn acks_for(&self, id: MessageId) -> usize {
        self.state
            .lock()
            .acks
            .iter()
            .filter(|ack| ack.id == id)
            .count()
    }

    pub fn nonce_reads(&self) -> u32 {
        self.state.lock().nonce_reads
    }

    pub fn processed_reads(&self) -> u32 {
        self.state.lock().processed_reads
    }

    fn read(&self) -> Result<parking_lot::MutexGuard<'_, State>, ChainError> {
        let mut state = self.state.lock();
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(ChainError::Rpc("connection reset by peer".into()));
        }

        Ok(state)
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn latest_block(&self) -> Result<u64, ChainError> {
        Ok(self.read()?.latest_block)
    }

    async fn message_paid_events(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainEvent>, ChainError> {
        Ok(self
            .read()?
            .events
            .iter()
            .filter(|event| (from..=to).contains(&event.block_number))
            .cloned()
            .collect())
    }

    async fn message_content(&self, id: MessageId) -> Result<String, ChainError> {
        self.read()?
            .contents
            .get(&id)
            .cloned()
            .ok_or(ChainError::NotFound(id))
    }

    async fn is_processed(&self, id: MessageId) -> Result<bool, ChainError> {
        let mut state = self.read()?;
        if state.failing_processed_reads > 0 {
            state.failing_processed_reads -= 1;
            return Err(ChainError::Rpc("request timed out".into()));
        }

        state.processed_reads += 1;
        Ok(state.processed.contains(&id))
    }
}

#[async_trait]
impl TxBackend for MockChain {
    fn sender(&self) -> Address {
        Self::SENDER
    }

    async fn pending_nonce(&self) -> Result<u64, ChainError> {
        let mut state = self.state.lock();
        state.nonce_reads += 1;
        Ok(state.acks.len() as u64)
    }

    async fn estimate_ack_gas(&self, id: MessageId) -> Result<u64, ChainError> {
        if self.state.lock().processed.contains(&id) {
            return Err(ChainError::Contract("execution reverted".into()));
        }

        Ok(50_000)
    }

    async fn send_ack(&self, id: MessageId, tx: AckTx) -> Result<B256, ChainError> {
        let delay = self.state.lock().send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();

        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(ChainError::Rpc("request timed out".into()));
        }

        if state.acks.iter().any(|ack| ack.nonce == tx.nonce) {
            return Err(ChainError::Contract("nonce too low".into()));
        }

        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&tx.nonce.to_be_bytes());
        hash[8..].copy_from_slice(&id.into_inner()[8..]);
        let tx_hash = B256::from(hash);

        let success = !state.revert_acks && state.processed.insert(id);
        state.receipts.insert(tx_hash, success);
        state.acks.push(SentAck {
            id,
            nonce: tx.nonce,
            tx_hash,
        });

        Ok(tx_hash)
    }

    async fn receipt_status(&self, tx_hash: B256) -> Result<Option<bool>, ChainError> {
        let state = self.state.lock();
        if state.withhold_receipts {
            return Ok(None);
        }

        Ok(state.receipts.get(&tx_hash).copied())
    }
}
