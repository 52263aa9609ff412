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

//! Configuration of the relay service.

use msgrelay_ethereum::{PrivateKeySigner, SubmitterConfig, primitives::Address};
use msgrelay_observer::ObserverConfig;
use msgrelay_rpc::RpcConfig;
use nonempty::NonEmpty;
use std::time::Duration;
use url::Url;

pub const DEFAULT_MAX_ACTIVE_JOBS: usize = 64;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct Config {
    pub node: NodeConfig,
    pub ethereum: EthereumConfig,
    pub agent: AgentConfig,
    pub rpc: Option<RpcConfig>,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Polling pauses while this many jobs are active.
    pub max_active_jobs: usize,
    pub agent_timeout: Duration,
    /// Time given to in-flight jobs on shutdown before they are abandoned.
    pub shutdown_grace: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            max_active_jobs: DEFAULT_MAX_ACTIVE_JOBS,
            agent_timeout: crate::job::DEFAULT_AGENT_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EthereumConfig {
    /// Primary endpoint first, fallbacks after it.
    pub rpc: NonEmpty<String>,
    pub message_manager: Address,
    pub signer: PrivateKeySigner,
    pub observer: ObserverConfig,
    pub submitter: SubmitterConfig,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Endpoint of the processing agent.
    pub url: Url,
}
