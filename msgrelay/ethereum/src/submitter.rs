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

//! Acknowledgement transactions: `markMessageProcessed` with serialized nonces.

use crate::{
    AckTx, ChainError, ChainReader, ReceiptStatus, TxBackend, nonce::NonceAllocator,
    retry::RetryPolicy,
};
use alloy::primitives::B256;
use msgrelay_common::MessageId;
use std::{sync::Arc, time::Duration};

/// Default bound on waiting for an acknowledgement receipt.
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Extra gas on top of the estimate, in percent.
const GAS_HEADROOM_PERCENT: u64 = 20;

#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
    /// Backoff applied to transient send failures.
    pub send_retry: RetryPolicy,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
            receipt_poll_interval: Duration::from_secs(1),
            send_retry: RetryPolicy::default(),
        }
    }
}

/// Successful outcome of [`AckSubmitter::submit_ack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The acknowledgement was mined in the given transaction.
    Confirmed(B256),
    /// The contract had already recorded the message as processed.
    AlreadyProcessed,
}

impl AckOutcome {
    pub fn tx_hash(&self) -> Option<B256> {
        match self {
            Self::Confirmed(tx_hash) => Some(*tx_hash),
            Self::AlreadyProcessed => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("failed to estimate gas: {0}")]
    Estimate(ChainError),
    #[error("failed to read pending nonce: {0}")]
    Nonce(ChainError),
    #[error("failed to send transaction: {0}")]
    Send(ChainError),
    #[error("transaction {0} reverted")]
    Reverted(B256),
    #[error("no receipt for transaction {0} within {1:?}")]
    ReceiptTimeout(B256, Duration),
}

impl SubmitError {
    /// Hash of the transaction if one was sent.
    pub fn tx_hash(&self) -> Option<B256> {
        match self {
            Self::Reverted(tx_hash) | Self::ReceiptTimeout(tx_hash, _) => Some(*tx_hash),
            _ => None,
        }
    }
}

/// Builds, signs, sends and confirms acknowledgement transactions.
///
/// Shared by all jobs. Nonce allocation and the send that consumes the nonce
/// form one critical section, receipts are awaited outside of it.
pub struct AckSubmitter {
    reader: Arc<dyn ChainReader>,
    backend: Arc<dyn TxBackend>,
    nonces: NonceAllocator,
    config: SubmitterConfig,
}

impl AckSubmitter {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        backend: Arc<dyn TxBackend>,
        config: SubmitterConfig,
    ) -> Self {
        Self {
            reader,
            backend,
            nonces: NonceAllocator::new(),
            config,
        }
    }

    /// Marks `id` as processed on chain.
    ///
    /// Reverts and receipt timeouts are final: nothing is resubmitted.
    pub async fn submit_ack(&self, id: MessageId) -> Result<AckOutcome, SubmitError> {
        let gas_limit = match self.backend.estimate_ack_gas(id).await {
            Ok(gas) => gas.saturating_add(gas.saturating_mul(GAS_HEADROOM_PERCENT) / 100),
            Err(err) => {
                if self.already_processed(id).await {
                    return Ok(AckOutcome::AlreadyProcessed);
                }

                return Err(SubmitError::Estimate(err));
            }
        };

        let tx_hash = self.send(id, gas_limit).await?;

        let status = self
            .backend
            .wait_for_receipt(
                tx_hash,
                self.config.receipt_timeout,
                self.config.receipt_poll_interval,
            )
            .await;

        match status {
            ReceiptStatus::Success => {
                log::info!("✅ Message {id} marked as processed in {tx_hash}");
                Ok(AckOutcome::Confirmed(tx_hash))
            }
            ReceiptStatus::Reverted => {
                if self.already_processed(id).await {
                    return Ok(AckOutcome::AlreadyProcessed);
                }

                log::error!(
                    "Acknowledgement of {id} reverted in {tx_hash}. Check that {} holds the agent role",
                    self.backend.sender()
                );
                Err(SubmitError::Reverted(tx_hash))
            }
            ReceiptStatus::TimedOut => {
                // The nonce may or may not be consumed by now.
                self.nonces.reset().await;

                log::error!(
                    "No receipt for acknowledgement of {id} ({tx_hash}) within {:?}",
                    self.config.receipt_timeout
                );
                Err(SubmitError::ReceiptTimeout(
                    tx_hash,
                    self.config.receipt_timeout,
                ))
            }
        }
    }

    async fn send(&self, id: MessageId, gas_limit: u64) -> Result<B256, SubmitError> {
        let policy = self.config.send_retry;
        let mut attempt = 0;

        loop {
            let slot = self
                .nonces
                .allocate(|| self.backend.pending_nonce())
                .await
                .map_err(SubmitError::Nonce)?;
            let nonce = slot.nonce();

            match self.backend.send_ack(id, AckTx { nonce, gas_limit }).await {
                Ok(tx_hash) => {
                    slot.commit();
                    log::debug!("Sent acknowledgement of {id}: tx {tx_hash}, nonce {nonce}");
                    return Ok(tx_hash);
                }
                Err(err) => {
                    drop(slot);

                    if is_nonce_collision(&err) {
                        log::error!(
                            "Nonce collision: nonce {nonce} of {} was already used while acknowledging {id}: {err}",
                            self.backend.sender()
                        );
                    }

                    if !err.is_transient() || attempt + 1 >= policy.attempts {
                        return Err(SubmitError::Send(err));
                    }

                    let delay = policy.delay(attempt);
                    log::warn!(
                        "Failed to send acknowledgement of {id}: {err}. Retrying in {delay:?}..."
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Chain-side check made after a rejected acknowledgement.
    async fn already_processed(&self, id: MessageId) -> bool {
        match self.reader.is_processed(id).await {
            Ok(true) => {
                log::error!("Double acknowledgement attempt: message {id} is already processed");
                true
            }
            Ok(false) => false,
            Err(err) => {
                log::warn!("Failed to read processed flag of {id}: {err}");
                false
            }
        }
    }
}

fn is_nonce_collision(err: &ChainError) -> bool {
    let message = err.to_string().to_lowercase();
    ["nonce too low", "already known", "replacement transaction underpriced"]
        .iter()
        .any(|pattern| message.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChain;
    use msgrelay_common::mock::Mock;
    use std::collections::BTreeSet;

    fn submitter(chain: &MockChain) -> AckSubmitter {
        AckSubmitter::new(
            Arc::new(chain.clone()),
            Arc::new(chain.clone()),
            SubmitterConfig {
                receipt_timeout: Duration::from_secs(5),
                receipt_poll_interval: Duration::from_millis(10),
                send_retry: RetryPolicy {
                    attempts: 3,
                    initial_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(10),
                },
            },
        )
    }

    #[tokio::test]
    async fn confirmed_ack() {
        let chain = MockChain::new();
        let id = MessageId::mock(());

        let outcome = submitter(&chain).submit_ack(id).await.unwrap();

        let acks = chain.acks();
        assert_eq!(acks.len(), 1);
        assert_eq!(outcome, AckOutcome::Confirmed(acks[0].tx_hash));
        assert!(chain.processed(id));
    }

    #[tokio::test]
    async fn transient_send_failures_are_retried() {
        let chain = MockChain::new();
        chain.fail_next_sends(2);

        let outcome = submitter(&chain).submit_ack(MessageId::mock(())).await.unwrap();

        assert!(matches!(outcome, AckOutcome::Confirmed(_)));
        assert_eq!(chain.acks().len(), 1);
    }

    #[tokio::test]
    async fn send_gives_up_after_retries() {
        let chain = MockChain::new();
        chain.fail_next_sends(10);

        let err = submitter(&chain)
            .submit_ack(MessageId::mock(()))
            .await
            .unwrap_err();

        assert!(matches!(err, SubmitError::Send(ChainError::Rpc(_))));
        assert!(chain.acks().is_empty());
    }

    #[tokio::test]
    async fn revert_is_terminal() {
        let chain = MockChain::new();
        chain.revert_acks();
        let id = MessageId::mock(());

        let err = submitter(&chain).submit_ack(id).await.unwrap_err();

        assert!(matches!(err, SubmitError::Reverted(_)));
        assert_eq!(chain.acks().len(), 1, "revert must not be resubmitted");
        assert!(!chain.processed(id));
    }

    #[tokio::test]
    async fn already_processed_message_is_not_resent() {
        let chain = MockChain::new();
        let id = MessageId::mock(());
        chain.mark_processed(id);

        let outcome = submitter(&chain).submit_ack(id).await.unwrap();

        assert_eq!(outcome, AckOutcome::AlreadyProcessed);
        assert!(chain.acks().is_empty());
    }

    #[tokio::test]
    async fn receipt_timeout_resets_nonce() {
        let chain = MockChain::new();
        chain.withhold_receipts(true);
        let submitter = AckSubmitter {
            config: SubmitterConfig {
                receipt_timeout: Duration::from_millis(50),
                ..SubmitterConfig::default()
            },
            ..submitter(&chain)
        };

        let err = submitter.submit_ack(MessageId::mock(())).await.unwrap_err();
        assert!(matches!(err, SubmitError::ReceiptTimeout(..)));
        assert_eq!(chain.acks().len(), 1);

        chain.withhold_receipts(false);
        let reads = chain.nonce_reads();
        submitter.submit_ack(MessageId::mock(())).await.unwrap();
        assert_eq!(chain.nonce_reads(), reads + 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acks_use_distinct_nonces() {
        let chain = MockChain::new();
        chain.set_send_delay(Duration::from_millis(2));
        let submitter = Arc::new(submitter(&chain));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let submitter = submitter.clone();
                tokio::spawn(async move { submitter.submit_ack(MessageId::mock(())).await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let nonces: Vec<_> = chain.acks().iter().map(|ack| ack.nonce).collect();
        let distinct: BTreeSet<_> = nonces.iter().copied().collect();
        assert_eq!(nonces.len(), 16);
        assert_eq!(distinct.len(), 16);
        assert_eq!(distinct, (0..16).collect());
    }
}
