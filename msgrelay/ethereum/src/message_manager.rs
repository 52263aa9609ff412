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
    AckTx, AlloyProvider, AlloyRecommendedFillers, ChainError, ChainReader, TxBackend,
    abi::IMessageManager, events, retry::RetryPolicy,
};
use alloy::{
    network::EthereumWallet,
    primitives::{Address, B256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::{
        client::RpcClient,
        types::eth::{Filter, Topic},
    },
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use msgrelay_common::{ChainEvent, MessageId};

type Instance = IMessageManager::IMessageManagerInstance<AlloyProvider>;
type QueryInstance = IMessageManager::IMessageManagerInstance<RootProvider>;

/// Max number of blocks covered by one `eth_getLogs` request.
pub const MAX_QUERY_BLOCK_RANGE: u64 = 10_000;

/// Read-only handle of the `MessageManager` contract.
#[derive(Clone)]
pub struct MessageManagerQuery {
    instance: QueryInstance,
    retry: RetryPolicy,
}

impl MessageManagerQuery {
    pub fn from_provider(address: Address, provider: RootProvider) -> Self {
        Self {
            instance: QueryInstance::new(address, provider),
            retry: RetryPolicy::default(),
        }
    }

    pub fn address(&self) -> Address {
        *self.instance.address()
    }

    /// Whether `account` holds the role required by `markMessageProcessed`.
    pub async fn has_agent_role(&self, account: Address) -> Result<bool, ChainError> {
        let role = self.instance.AGENT_ROLE().call().await?;
        Ok(self.instance.hasRole(role, account).call().await?)
    }
}

#[async_trait]
impl ChainReader for MessageManagerQuery {
    async fn latest_block(&self) -> Result<u64, ChainError> {
        let provider = self.instance.provider();

        self.retry
            .run("eth_blockNumber", move || async move {
                provider.get_block_number().await.map_err(Into::into)
            })
            .await
    }

    async fn message_paid_events(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainEvent>, ChainError> {
        let filter = Filter::new()
            .address(self.address())
            .event_signature(Topic::from_iter(events::signatures::ALL.iter().copied()))
            .from_block(from)
            .to_block(to);

        let provider = self.instance.provider();
        let filter = &filter;
        let logs = self
            .retry
            .run("eth_getLogs", move || async move {
                provider.get_logs(filter).await.map_err(Into::into)
            })
            .await?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            match events::try_extract_event(&log) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(err) => {
                    log::error!(
                        "Skipping log {:?} of tx {:?}: {err}",
                        log.log_index,
                        log.transaction_hash
                    );
                }
            }
        }

        Ok(events)
    }

    async fn message_content(&self, id: MessageId) -> Result<String, ChainError> {
        let content = self
            .retry
            .run("paidMessages", move || async move {
                self.instance
                    .paidMessages(id.into_inner())
                    .call()
                    .await
                    .map_err(Into::into)
            })
            .await?;

        if content.is_empty() {
            return Err(ChainError::NotFound(id));
        }

        Ok(content)
    }

    async fn is_processed(&self, id: MessageId) -> Result<bool, ChainError> {
        self.retry
            .run("processedMessages", move || async move {
                self.instance
                    .processedMessages(id.into_inner())
                    .call()
                    .await
                    .map_err(Into::into)
            })
            .await
    }
}

/// Signing handle of the `MessageManager` contract.
#[derive(Clone)]
pub struct MessageManager {
    instance: Instance,
    sender: Address,
}

impl MessageManager {
    pub fn new(address: Address, client: RpcClient, signer: PrivateKeySigner) -> Self {
        let sender = signer.address();
        let provider = ProviderBuilder::default()
            .filler(AlloyRecommendedFillers::default())
            .wallet(EthereumWallet::new(signer))
            .connect_client(client);

        Self {
            instance: Instance::new(address, provider),
            sender,
        }
    }

    pub fn address(&self) -> Address {
        *self.instance.address()
    }

    pub fn query(&self) -> MessageManagerQuery {
        MessageManagerQuery::from_provider(self.address(), self.instance.provider().root().clone())
    }
}

#[async_trait]
impl TxBackend for MessageManager {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn pending_nonce(&self) -> Result<u64, ChainError> {
        self.instance
            .provider()
            .get_transaction_count(self.sender)
            .pending()
            .await
            .map_err(Into::into)
    }

    async fn estimate_ack_gas(&self, id: MessageId) -> Result<u64, ChainError> {
        self.instance
            .markMessageProcessed(id.into_inner())
            .from(self.sender)
            .estimate_gas()
            .await
            .map_err(Into::into)
    }

    async fn send_ack(&self, id: MessageId, tx: AckTx) -> Result<B256, ChainError> {
        let pending = self
            .instance
            .markMessageProcessed(id.into_inner())
            .from(self.sender)
            .nonce(tx.nonce)
            .gas(tx.gas_limit)
            .send()
            .await?;

        Ok(*pending.tx_hash())
    }

    async fn receipt_status(&self, tx_hash: B256) -> Result<Option<bool>, ChainError> {
        let receipt = self
            .instance
            .provider()
            .get_transaction_receipt(tx_hash)
            .await?;

        Ok(receipt.map(|receipt| receipt.status()))
    }
}
