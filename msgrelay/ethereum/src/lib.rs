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

//! Ethereum access for the relay: `MessageManager` contract reads, log
//! decoding and the acknowledgement transaction pipeline.

use alloy::{
    network::{Ethereum as AlloyEthereum, EthereumWallet},
    primitives::{Address, B256},
    providers::{
        Identity, RootProvider,
        fillers::{
            BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller,
            SimpleNonceManager, WalletFiller,
        },
    },
    rpc::{client::RpcClient, types::eth::Log},
    sol_types::SolEvent,
};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use msgrelay_common::{ChainEvent, MessageId};
use nonempty::NonEmpty;
use std::time::Duration;

mod abi;
mod fallback_ws;

pub mod events;
pub mod message_manager;
pub mod nonce;
pub mod retry;
pub mod submitter;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use fallback_ws::FallbackWs;
pub use message_manager::MessageManager;
pub use alloy::signers::local::PrivateKeySigner;
pub use message_manager::MessageManagerQuery;
pub use submitter::{AckOutcome, AckSubmitter, SubmitError, SubmitterConfig};

pub mod primitives {
    pub use alloy::primitives::*;
}

type AlloyRecommendedFillers = JoinFill<
    GasFiller,
    JoinFill<BlobGasFiller, JoinFill<NonceFiller<SimpleNonceManager>, ChainIdFiller>>,
>;
type AlloyProvider = FillProvider<RelayFiller, RootProvider, AlloyEthereum>;

pub(crate) type RelayFiller =
    JoinFill<JoinFill<Identity, AlloyRecommendedFillers>, WalletFiller<EthereumWallet>>;

/// Errors of the chain access layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// Connectivity loss or a failing endpoint. Worth retrying.
    #[error("rpc error: {0}")]
    Rpc(String),
    /// The contract holds no record for the message.
    #[error("message {0} is not stored on chain")]
    NotFound(MessageId),
    /// A log matched a known signature but could not be decoded.
    #[error("malformed log: {0}")]
    Malformed(String),
    /// The node rejected the call, e.g. an execution revert.
    #[error("contract call failed: {0}")]
    Contract(String),
}

impl ChainError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }
}

impl From<alloy::transports::TransportError> for ChainError {
    fn from(err: alloy::transports::TransportError) -> Self {
        if err.as_error_resp().is_some() {
            Self::Contract(err.to_string())
        } else {
            Self::Rpc(err.to_string())
        }
    }
}

impl From<alloy::contract::Error> for ChainError {
    fn from(err: alloy::contract::Error) -> Self {
        match err {
            alloy::contract::Error::TransportError(err) => err.into(),
            err => Self::Contract(err.to_string()),
        }
    }
}

/// Outcome of waiting for a transaction receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
    TimedOut,
}

/// Parameters of one acknowledgement transaction, fixed by the submitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckTx {
    pub nonce: u64,
    pub gas_limit: u64,
}

/// Read side of the `MessageManager` contract.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Number of the latest block known to the endpoint.
    async fn latest_block(&self) -> Result<u64, ChainError>;

    /// `MessagePaid` events emitted within `from..=to`.
    ///
    /// Malformed logs never make it into the result.
    async fn message_paid_events(&self, from: u64, to: u64)
    -> Result<Vec<ChainEvent>, ChainError>;

    /// Message body stored by the contract for `id`.
    async fn message_content(&self, id: MessageId) -> Result<String, ChainError>;

    /// The contract's own processed flag for `id`.
    async fn is_processed(&self, id: MessageId) -> Result<bool, ChainError>;
}

/// Write side used by [`AckSubmitter`].
#[async_trait]
pub trait TxBackend: Send + Sync {
    /// Account which signs acknowledgements.
    fn sender(&self) -> Address;

    /// Pending transaction count of the sender.
    async fn pending_nonce(&self) -> Result<u64, ChainError>;

    async fn estimate_ack_gas(&self, id: MessageId) -> Result<u64, ChainError>;

    /// Signs and sends `markMessageProcessed(id)`, returning the transaction hash.
    async fn send_ack(&self, id: MessageId, tx: AckTx) -> Result<B256, ChainError>;

    /// `Some(success)` once the transaction is mined.
    async fn receipt_status(&self, tx_hash: B256) -> Result<Option<bool>, ChainError>;

    /// Polls for the receipt of `tx_hash` until `timeout` elapses.
    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        timeout: Duration,
        poll_interval: Duration,
    ) -> ReceiptStatus {
        let wait = async {
            loop {
                match self.receipt_status(tx_hash).await {
                    Ok(Some(true)) => return ReceiptStatus::Success,
                    Ok(Some(false)) => return ReceiptStatus::Reverted,
                    Ok(None) => {}
                    Err(err) => {
                        log::trace!("Failed to get transaction receipt for {tx_hash}: {err}");
                    }
                }

                tokio::time::sleep(poll_interval).await;
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or(ReceiptStatus::TimedOut)
    }
}

/// Builds an rpc client over the given endpoints.
///
/// Websocket endpoints are rotated by [`FallbackWs`] on connection loss,
/// http endpoints use the first entry only.
pub async fn rpc_client(rpc: NonEmpty<String>) -> Result<RpcClient> {
    if rpc.head.starts_with("ws") {
        return FallbackWs::client(rpc)
            .await
            .context("failed to connect to ethereum websocket rpc");
    }

    if !rpc.tail.is_empty() {
        log::warn!("Fallback endpoints are only supported for websocket rpc, using {}", rpc.head);
    }

    let url = rpc
        .head
        .parse()
        .with_context(|| format!("invalid ethereum rpc url `{}`", rpc.head))?;

    Ok(alloy::rpc::client::ClientBuilder::default().http(url))
}

pub(crate) fn decode_log<E: SolEvent>(log: &Log) -> Result<E, ChainError> {
    E::decode_raw_log(log.topics(), &log.data().data)
        .map_err(|err| ChainError::Malformed(format!("{}: {err}", E::SIGNATURE)))
}

macro_rules! signatures_consts {
    (
        $( $const_name:ident: $event:path, )*
    ) => {
        $(
            pub const $const_name: alloy::primitives::B256 = <$event as alloy::sol_types::SolEvent>::SIGNATURE_HASH;
        )*

        pub const ALL: &[alloy::primitives::B256] = &[$($const_name,)*];
    };
}

pub(crate) use signatures_consts;
