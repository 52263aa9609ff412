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

use super::{ConfigError, MergeParams, required};
use clap::Parser;
use msgrelay_ethereum::{
    PrivateKeySigner, SubmitterConfig, primitives::Address, retry::RetryPolicy,
};
use msgrelay_observer::ObserverConfig;
use msgrelay_service::config::EthereumConfig;
use nonempty::NonEmpty;
use serde::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, Default, Deserialize, Parser)]
#[serde(deny_unknown_fields)]
pub struct EthereumParams {
    /// Ethereum RPC endpoints.
    /// The first listed RPC is used as the primary endpoint.
    /// Additional entries will be used as a fallback variants.
    #[arg(
        long,
        alias = "eth-rpc",
        env = "MSGRELAY_ETHEREUM_RPC",
        value_delimiter = ','
    )]
    #[serde(rename = "rpc")]
    pub ethereum_rpc: Option<Vec<String>>,

    /// Address of the MessageManager contract.
    #[arg(long, env = "MSGRELAY_MESSAGE_MANAGER")]
    #[serde(rename = "message-manager")]
    pub message_manager: Option<String>,

    /// Hex-encoded private key of the acknowledging account.
    #[arg(long, env = "MSGRELAY_PRIVATE_KEY", hide_env_values = true)]
    #[serde(rename = "private-key")]
    pub private_key: Option<String>,

    /// Interval between event polls, in seconds.
    #[arg(long, env = "MSGRELAY_POLL_INTERVAL")]
    #[serde(rename = "poll-interval")]
    pub poll_interval: Option<u64>,

    /// Block to observe from. Chain head if not set.
    #[arg(long)]
    #[serde(rename = "from-block")]
    pub from_block: Option<u64>,

    /// Time to wait for an acknowledgement receipt, in seconds.
    #[arg(long)]
    #[serde(rename = "receipt-timeout")]
    pub receipt_timeout: Option<u64>,

    /// Attempts to send an acknowledgement over a flaky connection.
    #[arg(long)]
    #[serde(rename = "send-retries")]
    pub send_retries: Option<u32>,
}

impl EthereumParams {
    pub const RPC: &str = "ethereum-rpc (MSGRELAY_ETHEREUM_RPC)";
    pub const MESSAGE_MANAGER: &str = "message-manager (MSGRELAY_MESSAGE_MANAGER)";
    pub const PRIVATE_KEY: &str = "private-key (MSGRELAY_PRIVATE_KEY)";

    /// Default poll interval in seconds.
    pub const DEFAULT_POLL_INTERVAL: u64 = 2;

    fn rpc(&self) -> Option<NonEmpty<String>> {
        let rpc = self
            .ethereum_rpc
            .iter()
            .flatten()
            .map(|rpc| rpc.trim())
            .filter(|rpc| !rpc.is_empty())
            .map(Into::into)
            .collect();

        NonEmpty::from_vec(rpc)
    }

    pub(crate) fn missing(&self) -> impl Iterator<Item = &'static str> + use<> {
        [
            (self.rpc().is_none(), Self::RPC),
            (self.message_manager.is_none(), Self::MESSAGE_MANAGER),
            (self.private_key.is_none(), Self::PRIVATE_KEY),
        ]
        .into_iter()
        .filter_map(|(missing, name)| missing.then_some(name))
    }

    /// Convert self into a proper `EthereumConfig` object.
    pub fn into_config(self) -> Result<EthereumConfig, ConfigError> {
        let rpc = required(self.rpc(), Self::RPC)?;

        let message_manager: Address = required(self.message_manager, Self::MESSAGE_MANAGER)?
            .parse()
            .map_err(|err| ConfigError::invalid("message-manager", err))?;

        let signer: PrivateKeySigner = required(self.private_key, Self::PRIVATE_KEY)?
            .parse()
            .map_err(|err| ConfigError::invalid("private-key", err))?;

        let poll_interval = match self.poll_interval.unwrap_or(Self::DEFAULT_POLL_INTERVAL) {
            0 => return Err(ConfigError::invalid("poll-interval", "must be positive")),
            secs => Duration::from_secs(secs),
        };

        let mut submitter = SubmitterConfig::default();
        if let Some(secs) = self.receipt_timeout {
            submitter.receipt_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = self.send_retries {
            submitter.send_retry = RetryPolicy {
                attempts: attempts.max(1),
                ..submitter.send_retry
            };
        }

        Ok(EthereumConfig {
            rpc,
            message_manager,
            signer,
            observer: ObserverConfig {
                poll_interval,
                from_block: self.from_block,
                ..Default::default()
            },
            submitter,
        })
    }
}

impl MergeParams for EthereumParams {
    fn merge(self, with: Self) -> Self {
        Self {
            ethereum_rpc: self.ethereum_rpc.or(with.ethereum_rpc),
            message_manager: self.message_manager.or(with.message_manager),
            private_key: self.private_key.or(with.private_key),
            poll_interval: self.poll_interval.or(with.poll_interval),
            from_block: self.from_block.or(with.from_block),
            receipt_timeout: self.receipt_timeout.or(with.receipt_timeout),
            send_retries: self.send_retries.or(with.send_retries),
        }
    }
}
